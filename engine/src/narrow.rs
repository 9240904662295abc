//! Narrowing a change stream to the items that satisfy a predicate.
//!
//! A subscriber that only wants part of a collection cannot simply drop
//! changes whose current value fails the predicate: an item that stops
//! matching must be seen as removed, and one that starts matching as added.
//! [`ChangeFilter`] remembers which keys it has let through and rewrites
//! reasons accordingly.

use crate::{Change, ChangeReason, ChangeSet};
use std::collections::HashSet;
use std::hash::Hash;

/// Stateful per-subscriber filter over change sets.
#[derive(Debug, Clone)]
pub struct ChangeFilter<K> {
    passed: HashSet<K>,
}

impl<K> Default for ChangeFilter<K> {
    fn default() -> Self {
        Self {
            passed: HashSet::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> ChangeFilter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently visible through the filter.
    pub fn visible(&self) -> usize {
        self.passed.len()
    }

    /// Rewrite `changes` as seen through `predicate`.
    pub fn apply<T: Clone>(
        &mut self,
        changes: &ChangeSet<K, T>,
        predicate: impl Fn(&T) -> bool,
    ) -> ChangeSet<K, T> {
        let mut narrowed = ChangeSet::with_capacity(changes.len());

        for change in changes {
            let key = change.key();
            let was_visible = self.passed.contains(key);

            match change.reason() {
                ChangeReason::Add | ChangeReason::Update => {
                    let current = change.current();
                    match (predicate(current), was_visible) {
                        (true, false) => {
                            self.passed.insert(key.clone());
                            narrowed.push(Change::add(key.clone(), current.clone()));
                        }
                        (true, true) => {
                            let previous = change.previous().unwrap_or(current).clone();
                            narrowed.push(Change::update(key.clone(), current.clone(), previous));
                        }
                        (false, true) => {
                            self.passed.remove(key);
                            let last_seen = change.previous().unwrap_or(current).clone();
                            narrowed.push(Change::remove(key.clone(), last_seen));
                        }
                        (false, false) => {}
                    }
                }
                ChangeReason::Remove => {
                    if self.passed.remove(key) {
                        narrowed.push(change.clone());
                    }
                }
                ChangeReason::Refresh => {
                    let current = change.current();
                    match (predicate(current), was_visible) {
                        (true, true) => narrowed.push(change.clone()),
                        (true, false) => {
                            self.passed.insert(key.clone());
                            narrowed.push(Change::add(key.clone(), current.clone()));
                        }
                        (false, true) => {
                            self.passed.remove(key);
                            narrowed.push(Change::remove(key.clone(), current.clone()));
                        }
                        (false, false) => {}
                    }
                }
                ChangeReason::Move => {
                    if was_visible {
                        narrowed.push(change.clone());
                    }
                }
            }
        }

        narrowed
    }
}
