//! Key selection for typed items.

use keysync_engine::KeyField;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Bounds every cache key satisfies.
pub trait CacheKey:
    Clone + Eq + Hash + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> CacheKey for K where
    K: Clone + Eq + Hash + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds every cached item satisfies.
pub trait CacheItem: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheItem for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Extracts the key of an item.
///
/// The closure runs locally; the field path tells the hub where the same key
/// lives in the item's JSON form.
pub struct KeySelector<K, T> {
    field: KeyField,
    select: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<K, T> KeySelector<K, T> {
    pub fn new(field: impl Into<KeyField>, select: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self {
            field: field.into(),
            select: Arc::new(select),
        }
    }

    pub fn field(&self) -> &KeyField {
        &self.field
    }

    pub fn key_of(&self, item: &T) -> K {
        (self.select)(item)
    }
}

impl<K, T> Clone for KeySelector<K, T> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            select: self.select.clone(),
        }
    }
}

impl<K, T> fmt::Debug for KeySelector<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySelector")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_key() {
        let selector = KeySelector::new("Id", |item: &(String, u32)| item.0.clone());
        assert_eq!(selector.key_of(&("a".to_string(), 1)), "a");
        assert_eq!(selector.field().path(), "Id");

        let copy = selector.clone();
        assert_eq!(copy.key_of(&("b".to_string(), 2)), "b");
    }
}
