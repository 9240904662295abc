//! ChangeAwareCache - a keyed store that records the diff of every mutation.
//!
//! Pending changes are kept in mutation order. When a key that already has a
//! pending change is mutated again, the new change is merged into that
//! key's latest pending entry where possible:
//!
//! | pending | new    | result                                   |
//! |---------|--------|------------------------------------------|
//! | Add     | Add    | Add with the new value                   |
//! | Add     | Remove | nothing (both dropped)                   |
//! | Update  | Update | Update, `previous` stays the first value |
//! | Update  | Remove | Remove, `previous` stays the first value |
//!
//! Every other pair is appended as a separate entry, so replaying the captured
//! set against the state before the first mutation reproduces the current
//! state.

use crate::{Cache, Change, ChangeReason, ChangeSet, KeyedStore};
use std::collections::HashMap;
use std::hash::Hash;

/// Result of merging a new change into a key's latest pending change.
enum Merge<K, T> {
    /// Replace the pending entry
    Replace(Change<K, T>),
    /// Drop the pending entry and the new change
    Cancel,
    /// Keep the pending entry and append the new change
    Append(Change<K, T>, Change<K, T>),
}

fn merge<K, T>(pending: Change<K, T>, next: Change<K, T>) -> Merge<K, T> {
    match (pending.reason(), next.reason()) {
        (ChangeReason::Add, ChangeReason::Add) => {
            let (_, key, current, _) = next.into_parts();
            Merge::Replace(Change::add(key, current))
        }
        (ChangeReason::Add, ChangeReason::Remove) => Merge::Cancel,
        (ChangeReason::Update, ChangeReason::Update) => {
            let (_, _, _, first) = pending.into_parts();
            let (_, key, current, latest) = next.into_parts();
            Merge::Replace(Change::new(
                ChangeReason::Update,
                key,
                current,
                first.or(latest),
            ))
        }
        (ChangeReason::Update, ChangeReason::Remove) => {
            let (_, _, _, first) = pending.into_parts();
            let (_, key, current, latest) = next.into_parts();
            Merge::Replace(Change::new(
                ChangeReason::Remove,
                key,
                current,
                first.or(latest),
            ))
        }
        _ => Merge::Append(pending, next),
    }
}

/// A keyed store that records every mutation until captured.
#[derive(Debug, Clone)]
pub struct ChangeAwareCache<K, T> {
    items: Cache<K, T>,
    pending: Vec<Option<Change<K, T>>>,
    latest: HashMap<K, usize>,
}

impl<K, T> Default for ChangeAwareCache<K, T> {
    fn default() -> Self {
        Self {
            items: Cache::default(),
            pending: Vec::new(),
            latest: HashMap::new(),
        }
    }
}

impl<K, T> ChangeAwareCache<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing items. Nothing is pending afterwards.
    pub fn from_cache(items: Cache<K, T>) -> Self {
        Self {
            items,
            pending: Vec::new(),
            latest: HashMap::new(),
        }
    }

    /// Refresh each of `keys` that is present.
    pub fn refresh_keys<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        for key in keys {
            KeyedStore::refresh(self, key);
        }
    }

    /// Number of changes waiting to be captured.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|c| c.is_some()).count()
    }

    /// Return all pending changes in order and forget them.
    pub fn capture_changes(&mut self) -> ChangeSet<K, T> {
        self.latest.clear();
        std::mem::take(&mut self.pending)
            .into_iter()
            .flatten()
            .collect()
    }

    /// Borrow the current items.
    pub fn cache(&self) -> &Cache<K, T> {
        &self.items
    }

    /// Consume the cache, returning the current items and the pending changes.
    pub fn into_parts(mut self) -> (Cache<K, T>, ChangeSet<K, T>) {
        let changes = self.capture_changes();
        (self.items, changes)
    }

    fn record(&mut self, change: Change<K, T>) {
        let key = change.key().clone();

        if let Some(&index) = self.latest.get(&key) {
            if let Some(pending) = self.pending[index].take() {
                match merge(pending, change) {
                    Merge::Replace(merged) => {
                        self.pending[index] = Some(merged);
                        return;
                    }
                    Merge::Cancel => {
                        self.latest.remove(&key);
                        return;
                    }
                    Merge::Append(pending, change) => {
                        self.pending[index] = Some(pending);
                        self.latest.insert(key, self.pending.len());
                        self.pending.push(Some(change));
                        return;
                    }
                }
            }
        }

        self.latest.insert(key, self.pending.len());
        self.pending.push(Some(change));
    }
}

impl<K, T> From<Cache<K, T>> for ChangeAwareCache<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone,
{
    fn from(items: Cache<K, T>) -> Self {
        Self::from_cache(items)
    }
}

impl<K, T> KeyedStore<K, T> for ChangeAwareCache<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone,
{
    fn add_or_update(&mut self, item: T, key: K) {
        let change = match self.items.insert(key.clone(), item.clone()) {
            Some(previous) => Change::update(key, item, previous),
            None => Change::add(key, item),
        };
        self.record(change);
    }

    fn remove(&mut self, key: &K) {
        if let Some(removed) = self.items.take(key) {
            self.record(Change::remove(key.clone(), removed));
        }
    }

    fn refresh(&mut self, key: &K) {
        if let Some(current) = self.items.get(key).cloned() {
            self.record(Change::refresh(key.clone(), current));
        }
    }

    fn refresh_all(&mut self) {
        let keys: Vec<K> = self.items.iter_keys().cloned().collect();
        for key in &keys {
            self.refresh(key);
        }
    }

    fn clear(&mut self) {
        let removed: Vec<(K, T)> = self.items.drain().collect();
        for (key, item) in removed {
            self.record(Change::remove(key, item));
        }
    }

    fn clone_changes(&mut self, changes: &ChangeSet<K, T>) {
        for change in changes {
            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    self.add_or_update(change.current().clone(), change.key().clone())
                }
                ChangeReason::Remove => self.remove(change.key()),
                ChangeReason::Refresh => self.refresh(change.key()),
                ChangeReason::Move => {}
            }
        }
    }

    fn lookup(&self, key: &K) -> Option<&T> {
        self.items.get(key)
    }

    fn keys(&self) -> Vec<K> {
        self.items.keys()
    }

    fn items(&self) -> Vec<T> {
        KeyedStore::items(&self.items)
    }

    fn key_values(&self) -> Vec<(K, T)> {
        self.items.key_values()
    }

    fn count(&self) -> usize {
        self.items.len()
    }
}
