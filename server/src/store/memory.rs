//! In-memory authoritative store.

use super::{AuthoritativeStore, StoreTransaction};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use keysync_engine::{Filter, JsonKey};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Collection = HashMap<JsonKey, Value>;

/// Keeps every collection in memory. Writes are staged per transaction and
/// applied on commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: DashMap<String, Collection>,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed transactions so far.
    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Committed contents of `collection`.
    pub fn snapshot(&self, collection: &str) -> Collection {
        self.inner
            .collections
            .get(collection)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuthoritativeStore for MemoryStore {
    async fn begin(&self, collection: &str) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            collection: collection.to_string(),
            staged: HashMap::new(),
        }))
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    collection: String,
    /// `None` marks a staged delete
    staged: HashMap<JsonKey, Option<Value>>,
}

impl MemoryTransaction {
    fn committed(&self, key: &JsonKey) -> Option<Value> {
        self.inner
            .collections
            .get(&self.collection)
            .and_then(|c| c.get(key).cloned())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find(&mut self, key: &JsonKey) -> Result<Option<Value>> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.committed(key)),
        }
    }

    async fn query(&mut self, filter: Option<&Filter>) -> Result<Vec<(JsonKey, Value)>> {
        let mut items = self
            .inner
            .collections
            .get(&self.collection)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        for (key, staged) in &self.staged {
            match staged {
                Some(item) => items.insert(key.clone(), item.clone()),
                None => items.remove(key),
            };
        }

        Ok(items
            .into_iter()
            .filter(|(_, item)| filter.map_or(true, |f| f.matches(item)))
            .collect())
    }

    async fn upsert(&mut self, key: &JsonKey, item: &Value) -> Result<()> {
        self.staged.insert(key.clone(), Some(item.clone()));
        Ok(())
    }

    async fn delete(&mut self, key: &JsonKey) -> Result<()> {
        self.staged.insert(key.clone(), None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            inner,
            collection,
            staged,
        } = *self;

        {
            let mut items = inner.collections.entry(collection).or_default();
            for (key, staged) in staged {
                match staged {
                    Some(item) => items.insert(key, item),
                    None => items.remove(&key),
                };
            }
        }
        inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
