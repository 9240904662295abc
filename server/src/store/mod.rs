//! Authoritative storage for hub collections.
//!
//! The hub never mutates a collection outside a transaction: every command
//! opens one, reads the rows it touches, writes, and commits exactly once.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, run_migrations, PgStore, Pool};

use crate::error::Result;
use async_trait::async_trait;
use keysync_engine::{Filter, JsonKey};
use serde_json::Value;

/// Source of truth for every collection.
#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Start a transaction scoped to one collection.
    async fn begin(&self, collection: &str) -> Result<Box<dyn StoreTransaction>>;
}

/// One unit of work against a collection.
///
/// Writes become visible to other transactions only after [`commit`].
/// Dropping a transaction without committing discards its writes.
///
/// [`commit`]: StoreTransaction::commit
#[async_trait]
pub trait StoreTransaction: Send {
    async fn find(&mut self, key: &JsonKey) -> Result<Option<Value>>;

    /// Every item, or those matching `filter`.
    async fn query(&mut self, filter: Option<&Filter>) -> Result<Vec<(JsonKey, Value)>>;

    async fn upsert(&mut self, key: &JsonKey, item: &Value) -> Result<()>;

    async fn delete(&mut self, key: &JsonKey) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
