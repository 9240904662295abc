//! A single recorded mutation of one keyed item.

use serde::{Deserialize, Serialize};

/// Why a change was recorded.
///
/// `Move` belongs to ordered (list) variants of the structure and is never
/// produced by the keyed caches in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    /// The key was not present and now is
    Add,
    /// The key was present and its value was replaced
    Update,
    /// The key was present and is now gone
    Remove,
    /// The value changed internally and should be re-emitted
    Refresh,
    /// The item moved position (ordered collections only)
    #[serde(alias = "Moved")]
    Move,
}

/// Index value used by changes that carry no position.
pub const NO_INDEX: i32 = -1;

/// A single mutation of one keyed item.
///
/// `previous` is always empty for `Add`, holds the old value for `Update`,
/// and holds the locally known instance for `Remove` and `Refresh` when one
/// is available. Building an `Update` without a previous value is a caller
/// error and is not checked here.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<K, T> {
    reason: ChangeReason,
    key: K,
    current: T,
    previous: Option<T>,
    current_index: i32,
    previous_index: i32,
}

impl<K, T> Change<K, T> {
    /// Create a change from its raw parts.
    pub fn new(reason: ChangeReason, key: K, current: T, previous: Option<T>) -> Self {
        let previous = match reason {
            ChangeReason::Add => None,
            _ => previous,
        };
        Self {
            reason,
            key,
            current,
            previous,
            current_index: NO_INDEX,
            previous_index: NO_INDEX,
        }
    }

    /// An item was added under a new key.
    pub fn add(key: K, current: T) -> Self {
        Self::new(ChangeReason::Add, key, current, None)
    }

    /// An existing item was replaced.
    pub fn update(key: K, current: T, previous: T) -> Self {
        Self::new(ChangeReason::Update, key, current, Some(previous))
    }

    /// A positional move inside an ordered collection.
    pub fn moved(key: K, current: T, current_index: i32, previous_index: i32) -> Self {
        Self {
            reason: ChangeReason::Move,
            key,
            current,
            previous: None,
            current_index,
            previous_index,
        }
    }

    pub fn reason(&self) -> ChangeReason {
        self.reason
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn previous(&self) -> Option<&T> {
        self.previous.as_ref()
    }

    pub fn current_index(&self) -> i32 {
        self.current_index
    }

    pub fn previous_index(&self) -> i32 {
        self.previous_index
    }

    /// Consume the change, returning `(reason, key, current, previous)`.
    pub fn into_parts(self) -> (ChangeReason, K, T, Option<T>) {
        (self.reason, self.key, self.current, self.previous)
    }
}

impl<K, T: Clone> Change<K, T> {
    /// An item was removed; both sides carry the removed instance.
    pub fn remove(key: K, removed: T) -> Self {
        Self::new(ChangeReason::Remove, key, removed.clone(), Some(removed))
    }

    /// An item should be re-emitted without a value change.
    pub fn refresh(key: K, current: T) -> Self {
        Self::new(ChangeReason::Refresh, key, current.clone(), Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_never_carries_previous() {
        let change = Change::new(ChangeReason::Add, "a", 1, Some(0));
        assert_eq!(change.reason(), ChangeReason::Add);
        assert!(change.previous().is_none());
    }

    #[test]
    fn remove_and_refresh_keep_local_instance() {
        let removed = Change::remove("a", 7);
        assert_eq!(removed.current(), &7);
        assert_eq!(removed.previous(), Some(&7));

        let refreshed = Change::refresh("a", 3);
        assert_eq!(refreshed.current(), refreshed.previous().unwrap());
    }

    #[test]
    fn cache_changes_have_no_index() {
        let change = Change::update("a", 2, 1);
        assert_eq!(change.current_index(), NO_INDEX);
        assert_eq!(change.previous_index(), NO_INDEX);

        let moved = Change::moved("a", 2, 4, 1);
        assert_eq!(moved.reason(), ChangeReason::Move);
        assert_eq!((moved.current_index(), moved.previous_index()), (4, 1));
    }

    #[test]
    fn reason_serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&ChangeReason::Refresh).unwrap(),
            "\"Refresh\""
        );
        let parsed: ChangeReason = serde_json::from_str("\"Moved\"").unwrap();
        assert_eq!(parsed, ChangeReason::Move);
    }
}
