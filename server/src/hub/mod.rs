//! Hub command execution.
//!
//! Every mutating command runs as one batch: the rows it touches are read
//! into a [`ChangeAwareCache`], the command is applied to both the cache and
//! the store transaction, the transaction is committed once, and the captured
//! change set is pushed to the other connections of the collection.

use crate::error::{AppError, Result};
use crate::store::{AuthoritativeStore, StoreTransaction};
use crate::websocket::ConnectionManager;
use keysync_engine::{
    decode_change_set, encode_change_set, snapshot_value, Cache, ChangeAwareCache, ChangeReason,
    ChangeSet, HubCommand, JsonKey, JsonPredicateCodec, KeyField, KeyedStore, PredicateCodec,
    ServerFrame,
};
use serde_json::Value;
use std::sync::Arc;

/// Change set over untyped items, as the hub sees them.
pub type JsonChangeSet = ChangeSet<JsonKey, Value>;

/// Per-connection hub state.
#[derive(Debug, Clone)]
pub struct Session {
    conn_id: String,
    collection: String,
    key_field: Option<KeyField>,
}

impl Session {
    pub fn new(conn_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            collection: collection.into(),
            key_field: None,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key_field(&self) -> Option<&KeyField> {
        self.key_field.as_ref()
    }

    fn require_key_field(&self) -> Result<&KeyField> {
        self.key_field.as_ref().ok_or(AppError::NotInitialized)
    }
}

/// One write the batch will perform, resolved to its key.
enum Step {
    Upsert(JsonKey, Value),
    Delete(JsonKey),
    Refresh(JsonKey),
}

impl Step {
    fn key(&self) -> &JsonKey {
        match self {
            Step::Upsert(key, _) | Step::Delete(key) | Step::Refresh(key) => key,
        }
    }
}

/// Executes hub commands against the authoritative store.
pub struct Hub {
    store: Arc<dyn AuthoritativeStore>,
    connections: Arc<ConnectionManager>,
    codec: Arc<dyn PredicateCodec>,
}

impl Hub {
    pub fn new(store: Arc<dyn AuthoritativeStore>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            store,
            connections,
            codec: Arc::new(JsonPredicateCodec),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Run `command` for the connection owning `session`.
    ///
    /// Mutations answer `null`; their change set goes to every other
    /// connection on the collection.
    pub async fn execute(&self, session: &mut Session, command: HubCommand) -> Result<Value> {
        match command {
            HubCommand::Initialize { key_field } => {
                tracing::debug!(
                    conn_id = %session.conn_id,
                    collection = %session.collection,
                    key_field = %key_field,
                    "Connection initialized"
                );
                session.key_field = Some(key_field);
                Ok(Value::Null)
            }
            HubCommand::GetKeyValuePairs => self.snapshot(&session.collection, None).await,
            HubCommand::GetKeyValuePairsFiltered { filter } => {
                self.snapshot(&session.collection, Some(filter.as_str())).await
            }
            mutation => {
                let target = mutation.target();
                let steps = self.plan(session, mutation)?;
                let changes = self.apply(&session.collection, steps).await?;

                tracing::debug!(
                    conn_id = %session.conn_id,
                    collection = %session.collection,
                    command = target,
                    changes = changes.len(),
                    "Command applied"
                );

                if !changes.is_empty() {
                    let frame = ServerFrame::changes(encode_change_set(&changes)?);
                    self.connections
                        .broadcast_except(&session.collection, &session.conn_id, frame);
                }
                Ok(Value::Null)
            }
        }
    }

    /// Upsert items added from outside any hub connection and push the
    /// result to every connection of the collection.
    pub async fn publish_external(
        &self,
        collection: &str,
        key_field: &KeyField,
        items: Vec<Value>,
    ) -> Result<JsonChangeSet> {
        let steps = items
            .into_iter()
            .map(|item| -> Result<Step> { Ok(Step::Upsert(key_field.extract(&item)?, item)) })
            .collect::<Result<Vec<_>>>()?;
        let changes = self.apply(collection, steps).await?;

        if !changes.is_empty() {
            let frame = ServerFrame::changes(encode_change_set(&changes)?);
            let sent = self.connections.broadcast_all(collection, frame);
            tracing::info!(
                collection = %collection,
                changes = changes.len(),
                recipients = sent,
                "External items published"
            );
        }
        Ok(changes)
    }

    /// Authoritative snapshot, optionally narrowed by an encoded filter.
    pub async fn snapshot(&self, collection: &str, filter: Option<&str>) -> Result<Value> {
        let filter = filter.map(|text| self.codec.decode(text)).transpose()?;
        let mut tx = self.store.begin(collection).await?;
        let pairs = tx.query(filter.as_ref()).await?;
        Ok(snapshot_value(pairs))
    }

    fn plan(&self, session: &Session, command: HubCommand) -> Result<Vec<Step>> {
        let steps = match command {
            HubCommand::AddOrUpdateObjects { items } => {
                let field = session.require_key_field()?;
                items
                    .into_iter()
                    .map(|item| -> Result<Step> { Ok(Step::Upsert(field.extract(&item)?, item)) })
                    .collect::<Result<Vec<_>>>()?
            }
            HubCommand::AddOrUpdateValueWithKey { item, key } => {
                vec![Step::Upsert(JsonKey::try_from(key)?, item)]
            }
            HubCommand::RemoveItems { items } => {
                let field = session.require_key_field()?;
                items
                    .iter()
                    .map(|item| -> Result<Step> { Ok(Step::Delete(field.extract(item)?)) })
                    .collect::<Result<Vec<_>>>()?
            }
            HubCommand::RemoveKeys { keys } => keys
                .into_iter()
                .map(|key| -> Result<Step> { Ok(Step::Delete(JsonKey::try_from(key)?)) })
                .collect::<Result<Vec<_>>>()?,
            HubCommand::RefreshKeys { keys } => keys
                .into_iter()
                .map(|key| -> Result<Step> { Ok(Step::Refresh(JsonKey::try_from(key)?)) })
                .collect::<Result<Vec<_>>>()?,
            HubCommand::Clone { change_set } => decode_change_set::<JsonKey, Value>(&change_set)?
                .into_iter()
                .filter_map(|change| {
                    let (reason, key, current, _) = change.into_parts();
                    match reason {
                        ChangeReason::Add | ChangeReason::Update => Some(Step::Upsert(key, current)),
                        ChangeReason::Remove => Some(Step::Delete(key)),
                        ChangeReason::Refresh => Some(Step::Refresh(key)),
                        ChangeReason::Move => None,
                    }
                })
                .collect(),
            other => {
                return Err(AppError::BadRequest(format!(
                    "{} is not a mutation",
                    other.target()
                )))
            }
        };
        Ok(steps)
    }

    /// Apply `steps` in one transaction and return the captured changes.
    async fn apply(&self, collection: &str, steps: Vec<Step>) -> Result<JsonChangeSet> {
        let mut tx = self.store.begin(collection).await?;

        let mut seeded = Cache::new();
        for step in &steps {
            let key = step.key();
            if !seeded.contains_key(key) {
                if let Some(existing) = tx.find(key).await? {
                    seeded.insert(key.clone(), existing);
                }
            }
        }

        let mut cache = ChangeAwareCache::from_cache(seeded);
        for step in steps {
            apply_step(tx.as_mut(), &mut cache, step).await?;
        }

        tx.commit().await?;
        Ok(cache.capture_changes())
    }
}

async fn apply_step(
    tx: &mut dyn StoreTransaction,
    cache: &mut ChangeAwareCache<JsonKey, Value>,
    step: Step,
) -> Result<()> {
    match step {
        Step::Upsert(key, item) => {
            tx.upsert(&key, &item).await?;
            cache.add_or_update(item, key);
        }
        Step::Delete(key) => {
            if cache.lookup(&key).is_some() {
                tx.delete(&key).await?;
                cache.remove(&key);
            }
        }
        // Refresh touches no rows
        Step::Refresh(key) => cache.refresh(&key),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use keysync_engine::{Change, Filter};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Hub,
        peer: mpsc::UnboundedReceiver<ServerFrame>,
        origin: mpsc::UnboundedReceiver<ServerFrame>,
        session: Session,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let connections = ConnectionManager::new_shared();
        let (origin_tx, origin) = mpsc::unbounded_channel();
        let (peer_tx, peer) = mpsc::unbounded_channel();
        let conn_id = connections.register("people", origin_tx);
        connections.register("people", peer_tx);

        Fixture {
            hub: Hub::new(store.clone(), connections),
            store,
            peer,
            origin,
            session: Session::new(conn_id, "people"),
        }
    }

    fn pushed(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> JsonChangeSet {
        match rx.try_recv().expect("a pushed frame") {
            ServerFrame::Push { payload, .. } => decode_change_set(&payload).unwrap(),
            other => panic!("expected a push, got {other:?}"),
        }
    }

    async fn init(f: &mut Fixture) {
        f.hub
            .execute(
                &mut f.session,
                HubCommand::Initialize {
                    key_field: KeyField::new("id"),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn item_commands_need_initialize() {
        let mut f = fixture();
        let err = f
            .hub
            .execute(
                &mut f.session,
                HubCommand::AddOrUpdateObjects {
                    items: vec![json!({"id": "a"})],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotInitialized));

        // Key commands and reads work without it
        f.hub
            .execute(&mut f.session, HubCommand::RemoveKeys { keys: vec![json!("a")] })
            .await
            .unwrap();
        let snapshot = f
            .hub
            .execute(&mut f.session, HubCommand::GetKeyValuePairs)
            .await
            .unwrap();
        assert_eq!(snapshot, json!({}));
    }

    #[tokio::test]
    async fn mutation_commits_once_and_skips_origin() {
        let mut f = fixture();
        init(&mut f).await;

        f.hub
            .execute(
                &mut f.session,
                HubCommand::AddOrUpdateObjects {
                    items: vec![json!({"id": "a", "age": 44}), json!({"id": "a", "age": 43})],
                },
            )
            .await
            .unwrap();

        assert_eq!(f.store.commit_count(), 1);
        assert!(f.origin.try_recv().is_err());

        let changes = pushed(&mut f.peer);
        let reasons: Vec<_> = changes.iter().map(|c| c.reason()).collect();
        assert_eq!(reasons, vec![ChangeReason::Add, ChangeReason::Update]);
        assert_eq!(f.store.snapshot("people")[&JsonKey::from("a")], json!({"id": "a", "age": 43}));
    }

    #[tokio::test]
    async fn update_carries_stored_previous() {
        let mut f = fixture();
        init(&mut f).await;
        let add = HubCommand::AddOrUpdateObjects {
            items: vec![json!({"id": "a", "age": 1})],
        };
        f.hub.execute(&mut f.session, add).await.unwrap();
        pushed(&mut f.peer);

        let update = HubCommand::AddOrUpdateObjects {
            items: vec![json!({"id": "a", "age": 2})],
        };
        f.hub.execute(&mut f.session, update).await.unwrap();

        let changes = pushed(&mut f.peer);
        let change = &changes.as_slice()[0];
        assert_eq!(change.reason(), ChangeReason::Update);
        assert_eq!(change.previous(), Some(&json!({"id": "a", "age": 1})));
    }

    #[tokio::test]
    async fn explicit_key_overrides_key_field() {
        let mut f = fixture();
        f.hub
            .execute(
                &mut f.session,
                HubCommand::AddOrUpdateValueWithKey {
                    item: json!({"id": "a", "age": 1}),
                    key: json!("x"),
                },
            )
            .await
            .unwrap();

        let changes = pushed(&mut f.peer);
        assert_eq!(changes.as_slice()[0].key(), &JsonKey::from("x"));
        let stored = f.store.snapshot("people");
        assert_eq!(stored[&JsonKey::from("x")], json!({"id": "a", "age": 1}));
        assert!(!stored.contains_key(&JsonKey::from("a")));
    }

    #[tokio::test]
    async fn removing_missing_keys_broadcasts_nothing() {
        let mut f = fixture();
        f.hub
            .execute(
                &mut f.session,
                HubCommand::RemoveKeys {
                    keys: vec![json!("ghost")],
                },
            )
            .await
            .unwrap();
        assert!(f.peer.try_recv().is_err());

        f.hub
            .execute(
                &mut f.session,
                HubCommand::RefreshKeys {
                    keys: vec![json!("ghost")],
                },
            )
            .await
            .unwrap();
        assert!(f.peer.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_items_and_refresh() {
        let mut f = fixture();
        init(&mut f).await;
        let add = HubCommand::AddOrUpdateObjects {
            items: vec![json!({"id": "a"}), json!({"id": "b"})],
        };
        f.hub.execute(&mut f.session, add).await.unwrap();
        pushed(&mut f.peer);

        let refresh = HubCommand::RefreshKeys {
            keys: vec![json!("b")],
        };
        f.hub.execute(&mut f.session, refresh).await.unwrap();
        assert_eq!(pushed(&mut f.peer).refreshes(), 1);

        let remove = HubCommand::RemoveItems {
            items: vec![json!({"id": "a"})],
        };
        f.hub.execute(&mut f.session, remove).await.unwrap();
        let changes = pushed(&mut f.peer);
        assert_eq!(changes.removes(), 1);
        assert_eq!(changes.as_slice()[0].current(), &json!({"id": "a"}));
        assert_eq!(f.store.snapshot("people").len(), 1);
    }

    #[tokio::test]
    async fn clone_replays_change_set() {
        let mut f = fixture();
        let replay: JsonChangeSet = vec![
            Change::add(JsonKey::from("a"), json!({"id": "a"})),
            Change::add(JsonKey::from("b"), json!({"id": "b"})),
            Change::remove(JsonKey::from("b"), json!({"id": "b"})),
        ]
        .into();
        let command = HubCommand::Clone {
            change_set: encode_change_set(&replay).unwrap(),
        };

        f.hub.execute(&mut f.session, command).await.unwrap();

        let changes = pushed(&mut f.peer);
        assert_eq!(changes.adds(), 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(f.store.snapshot("people").len(), 1);
    }

    #[tokio::test]
    async fn filtered_snapshot() {
        let mut f = fixture();
        init(&mut f).await;
        let add = HubCommand::AddOrUpdateObjects {
            items: vec![json!({"id": "a", "age": 5}), json!({"id": "b", "age": 50})],
        };
        f.hub.execute(&mut f.session, add).await.unwrap();

        let filter = JsonPredicateCodec
            .encode(&Filter::greater_than("age", 18))
            .unwrap();
        let snapshot = f
            .hub
            .execute(&mut f.session, HubCommand::GetKeyValuePairsFiltered { filter })
            .await
            .unwrap();
        assert_eq!(snapshot, json!({"b": {"id": "b", "age": 50}}));

        let bad = HubCommand::GetKeyValuePairsFiltered {
            filter: "{\"op\":\"nope\"}".to_string(),
        };
        assert!(matches!(
            f.hub.execute(&mut f.session, bad).await,
            Err(AppError::Engine(_))
        ));
    }

    #[tokio::test]
    async fn external_items_reach_everyone() {
        let mut f = fixture();
        let changes = f
            .hub
            .publish_external("people", &KeyField::new("id"), vec![json!({"id": 1})])
            .await
            .unwrap();

        assert_eq!(changes.adds(), 1);
        assert_eq!(pushed(&mut f.origin).adds(), 1);
        assert_eq!(pushed(&mut f.peer).adds(), 1);
    }

    #[tokio::test]
    async fn bad_keys_abort_the_batch() {
        let mut f = fixture();
        init(&mut f).await;
        let add = HubCommand::AddOrUpdateObjects {
            items: vec![json!({"id": "a"}), json!({"name": "no id"})],
        };

        let err = f.hub.execute(&mut f.session, add).await.unwrap_err();
        assert!(matches!(err, AppError::Engine(_)));
        assert!(f.store.snapshot("people").is_empty());
        assert_eq!(f.store.commit_count(), 0);
    }
}
