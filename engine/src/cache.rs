//! Cache - the plain keyed store.
//!
//! No change tracking happens here. The [`ChangeAwareCache`](crate::ChangeAwareCache)
//! wraps a `Cache` to record diffs; on its own a `Cache` is the fast path used
//! when nobody needs the diff.

use crate::{ChangeReason, ChangeSet};
use std::collections::HashMap;
use std::hash::Hash;

/// Mutation surface shared by [`Cache`] and [`ChangeAwareCache`](crate::ChangeAwareCache).
///
/// Callers that only issue mutation intents (the client's remote updater, the
/// server hub) write against this trait so the same code runs with or without
/// change collection.
pub trait KeyedStore<K, T> {
    /// Insert or replace the item stored under `key`.
    fn add_or_update(&mut self, item: T, key: K);

    /// Remove the item stored under `key`, if any.
    fn remove(&mut self, key: &K);

    /// Re-emit the item stored under `key`, if any.
    fn refresh(&mut self, key: &K);

    /// Re-emit every item.
    fn refresh_all(&mut self);

    /// Remove every item.
    fn clear(&mut self);

    /// Replay an externally produced change set.
    fn clone_changes(&mut self, changes: &ChangeSet<K, T>);

    /// Look up the item stored under `key`.
    fn lookup(&self, key: &K) -> Option<&T>;

    /// Snapshot of all keys.
    fn keys(&self) -> Vec<K>;

    /// Snapshot of all items.
    fn items(&self) -> Vec<T>;

    /// Snapshot of all key/item pairs.
    fn key_values(&self) -> Vec<(K, T)>;

    /// Number of items.
    fn count(&self) -> usize;
}

/// A keyed collection of items.
#[derive(Debug, Clone)]
pub struct Cache<K, T> {
    items: HashMap<K, T>,
}

impl<K: Eq + Hash, T: PartialEq> PartialEq for Cache<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<K, T> Default for Cache<K, T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T> Cache<K, T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: HashMap::with_capacity(capacity),
        }
    }

    /// Insert or replace an item, returning the replaced value.
    pub fn insert(&mut self, key: K, item: T) -> Option<T> {
        self.items.insert(key, item)
    }

    /// Remove an item, returning it.
    pub fn take(&mut self, key: &K) -> Option<T> {
        self.items.remove(key)
    }

    /// Get an item by key.
    pub fn get(&self, key: &K) -> Option<&T> {
        self.items.get(key)
    }

    /// Check if a key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the cache holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over key/item pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &T)> {
        self.items.iter()
    }

    /// Iterate over keys.
    pub fn iter_keys(&self) -> impl Iterator<Item = &K> {
        self.items.keys()
    }

    /// Iterate over items.
    pub fn iter_items(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Remove and return every item.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, T)> + '_ {
        self.items.drain()
    }

    /// Consume the cache, returning the underlying map.
    pub fn into_inner(self) -> HashMap<K, T> {
        self.items
    }

    /// Apply a change set as-is: adds and updates insert, removes erase.
    pub fn apply(&mut self, changes: &ChangeSet<K, T>)
    where
        K: Clone,
        T: Clone,
    {
        for change in changes {
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    self.items
                        .insert(change.key().clone(), change.current().clone());
                }
                ChangeReason::Remove => {
                    self.items.remove(change.key());
                }
                ChangeReason::Refresh | ChangeReason::Move => {}
            }
        }
    }
}

impl<K: Eq + Hash, T> From<HashMap<K, T>> for Cache<K, T> {
    fn from(items: HashMap<K, T>) -> Self {
        Self { items }
    }
}

impl<K: Eq + Hash, T> FromIterator<(K, T)> for Cache<K, T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<K, T> KeyedStore<K, T> for Cache<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone,
{
    fn add_or_update(&mut self, item: T, key: K) {
        self.items.insert(key, item);
    }

    fn remove(&mut self, key: &K) {
        self.items.remove(key);
    }

    fn refresh(&mut self, _key: &K) {}

    fn refresh_all(&mut self) {}

    fn clear(&mut self) {
        self.items.clear();
    }

    fn clone_changes(&mut self, changes: &ChangeSet<K, T>) {
        self.apply(changes);
    }

    fn lookup(&self, key: &K) -> Option<&T> {
        self.items.get(key)
    }

    fn keys(&self) -> Vec<K> {
        self.items.keys().cloned().collect()
    }

    fn items(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }

    fn key_values(&self) -> Vec<(K, T)> {
        self.items
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn count(&self) -> usize {
        self.items.len()
    }
}
