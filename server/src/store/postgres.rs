//! PostgreSQL authoritative store.
//!
//! Items live in one table keyed by `(collection, item_key)`. Keys are stored
//! in their JSON text form so that `"7"` and `7` stay distinct.

use super::{AuthoritativeStore, StoreTransaction};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use keysync_engine::{Filter, JsonKey};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthoritativeStore for PgStore {
    async fn begin(&self, collection: &str) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            collection: collection.to_string(),
        }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    collection: String,
}

fn encode_key(key: &JsonKey) -> Result<String> {
    serde_json::to_string(key).map_err(|e| AppError::Internal(format!("key encoding: {e}")))
}

fn decode_key(text: &str) -> Result<JsonKey> {
    serde_json::from_str(text)
        .map_err(|e| AppError::Internal(format!("stored key '{text}' is invalid: {e}")))
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn find(&mut self, key: &JsonKey) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT body FROM items WHERE collection = $1 AND item_key = $2")
            .bind(&self.collection)
            .bind(encode_key(key)?)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("body")?)),
            None => Ok(None),
        }
    }

    async fn query(&mut self, filter: Option<&Filter>) -> Result<Vec<(JsonKey, Value)>> {
        let rows = sqlx::query("SELECT item_key, body FROM items WHERE collection = $1")
            .bind(&self.collection)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let body: Value = row.try_get("body")?;
            if filter.map_or(true, |f| f.matches(&body)) {
                let key: String = row.try_get("item_key")?;
                items.push((decode_key(&key)?, body));
            }
        }
        Ok(items)
    }

    async fn upsert(&mut self, key: &JsonKey, item: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (collection, item_key, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, item_key)
            DO UPDATE SET body = EXCLUDED.body, updated_at = now()
            "#,
        )
        .bind(&self.collection)
        .bind(encode_key(key)?)
        .bind(item)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete(&mut self, key: &JsonKey) -> Result<()> {
        sqlx::query("DELETE FROM items WHERE collection = $1 AND item_key = $2")
            .bind(&self.collection)
            .bind(encode_key(key)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
