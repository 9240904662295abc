//! ChangeSet - an ordered batch of changes.

use crate::{Change, ChangeReason};

/// An ordered batch of changes produced by one commit.
///
/// Counts are derived by scanning the batch, so they always agree with the
/// contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<K, T> {
    changes: Vec<Change<K, T>>,
}

/// Per-reason counts of a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
    pub refreshes: usize,
    pub moves: usize,
}

impl ChangeSummary {
    pub fn total(&self) -> usize {
        self.adds + self.updates + self.removes + self.refreshes + self.moves
    }
}

impl<K, T> Default for ChangeSet<K, T> {
    fn default() -> Self {
        Self {
            changes: Vec::new(),
        }
    }
}

impl<K, T> ChangeSet<K, T> {
    /// The empty change set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            changes: Vec::with_capacity(capacity),
        }
    }

    /// Append a change.
    pub fn push(&mut self, change: Change<K, T>) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change<K, T>> {
        self.changes.iter()
    }

    pub fn as_slice(&self) -> &[Change<K, T>] {
        &self.changes
    }

    pub fn adds(&self) -> usize {
        self.count_of(ChangeReason::Add)
    }

    pub fn updates(&self) -> usize {
        self.count_of(ChangeReason::Update)
    }

    pub fn removes(&self) -> usize {
        self.count_of(ChangeReason::Remove)
    }

    pub fn refreshes(&self) -> usize {
        self.count_of(ChangeReason::Refresh)
    }

    pub fn moves(&self) -> usize {
        self.count_of(ChangeReason::Move)
    }

    /// All per-reason counts in one pass.
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change.reason() {
                ChangeReason::Add => summary.adds += 1,
                ChangeReason::Update => summary.updates += 1,
                ChangeReason::Remove => summary.removes += 1,
                ChangeReason::Refresh => summary.refreshes += 1,
                ChangeReason::Move => summary.moves += 1,
            }
        }
        summary
    }

    /// Keep only changes whose key satisfies `predicate`.
    pub fn retain_keys(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        self.changes.retain(|c| predicate(c.key()));
    }

    /// Changes that touch `key`, in order.
    pub fn for_key<'a>(&'a self, key: &'a K) -> impl Iterator<Item = &'a Change<K, T>> + 'a
    where
        K: PartialEq,
    {
        self.changes.iter().filter(move |c| c.key() == key)
    }

    pub fn into_vec(self) -> Vec<Change<K, T>> {
        self.changes
    }

    fn count_of(&self, reason: ChangeReason) -> usize {
        self.changes.iter().filter(|c| c.reason() == reason).count()
    }
}

impl<K, T> From<Vec<Change<K, T>>> for ChangeSet<K, T> {
    fn from(changes: Vec<Change<K, T>>) -> Self {
        Self { changes }
    }
}

impl<K, T> FromIterator<Change<K, T>> for ChangeSet<K, T> {
    fn from_iter<I: IntoIterator<Item = Change<K, T>>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

impl<K, T> Extend<Change<K, T>> for ChangeSet<K, T> {
    fn extend<I: IntoIterator<Item = Change<K, T>>>(&mut self, iter: I) {
        self.changes.extend(iter);
    }
}

impl<K, T> IntoIterator for ChangeSet<K, T> {
    type Item = Change<K, T>;
    type IntoIter = std::vec::IntoIter<Change<K, T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a, K, T> IntoIterator for &'a ChangeSet<K, T> {
    type Item = &'a Change<K, T>;
    type IntoIter = std::slice::Iter<'a, Change<K, T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
