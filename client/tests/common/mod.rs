//! In-process hub used by the client integration tests.
//!
//! Applies commands to an authoritative JSON collection the same way a
//! keysync server does and pushes the resulting change sets to every other
//! connected client.

#![allow(dead_code)]

use async_trait::async_trait;
use keysync_client::{PushHandler, ReconnectHandler, Transport, TransportError};
use keysync_engine::{
    decode_change_set, encode_change_set, snapshot_value, Cache, ChangeAwareCache, HubCommand,
    JsonKey, JsonPredicateCodec, KeyField, KeyedStore, PredicateCodec, CHANGES_EVENT,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};

#[derive(Default)]
pub struct LoopbackHub {
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    items: Cache<JsonKey, Value>,
    key_field: Option<KeyField>,
    clients: Vec<Weak<HubClient>>,
    commands: Vec<String>,
}

pub struct HubClient {
    hub: Arc<LoopbackHub>,
    push_handlers: Mutex<Vec<(String, PushHandler)>>,
    reconnect_handlers: Mutex<Vec<ReconnectHandler>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(self: &Arc<Self>) -> Arc<HubClient> {
        let client = Arc::new(HubClient {
            hub: self.clone(),
            push_handlers: Mutex::new(Vec::new()),
            reconnect_handlers: Mutex::new(Vec::new()),
        });
        self.state.lock().clients.push(Arc::downgrade(&client));
        client
    }

    /// Targets of every command received so far.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn initialize(&self, key_field: &str) {
        self.state.lock().key_field = Some(KeyField::new(key_field));
    }

    /// Apply a command as if sent by a client that is not connected here.
    pub fn apply_external(&self, target: &str, arguments: Vec<Value>) {
        let payload = self.execute(target, arguments).expect("external command");
        if let Some(payload) = payload {
            self.broadcast(None, &payload);
        }
    }

    /// Apply a command without telling anyone, as if the push was lost.
    pub fn apply_silently(&self, target: &str, arguments: Vec<Value>) {
        self.execute(target, arguments).expect("silent command");
    }

    fn execute(&self, target: &str, arguments: Vec<Value>) -> Result<Option<String>, TransportError> {
        let command =
            HubCommand::parse(target, arguments).map_err(|e| TransportError::Remote(e.to_string()))?;
        let mut state = self.state.lock();
        state.commands.push(target.to_string());

        let key_field = state.key_field.clone();
        let extract = |item: &Value| -> Result<JsonKey, TransportError> {
            key_field
                .as_ref()
                .ok_or_else(|| TransportError::Remote("not initialized".to_string()))?
                .extract(item)
                .map_err(|e| TransportError::Remote(e.to_string()))
        };
        let as_key =
            |value: Value| JsonKey::try_from(value).map_err(|e| TransportError::Remote(e.to_string()));

        let mut tracked = ChangeAwareCache::from_cache(std::mem::take(&mut state.items));
        let outcome = (|| {
            match command {
                HubCommand::Initialize { .. }
                | HubCommand::GetKeyValuePairs
                | HubCommand::GetKeyValuePairsFiltered { .. } => {}
                HubCommand::AddOrUpdateObjects { items } => {
                    for item in items {
                        let key = extract(&item)?;
                        tracked.add_or_update(item, key);
                    }
                }
                HubCommand::AddOrUpdateValueWithKey { item, key } => {
                    tracked.add_or_update(item, as_key(key)?);
                }
                HubCommand::RemoveItems { items } => {
                    for item in items {
                        tracked.remove(&extract(&item)?);
                    }
                }
                HubCommand::RemoveKeys { keys } => {
                    for key in keys {
                        tracked.remove(&as_key(key)?);
                    }
                }
                HubCommand::RefreshKeys { keys } => {
                    for key in keys {
                        tracked.refresh(&as_key(key)?);
                    }
                }
                HubCommand::Clone { change_set } => {
                    let changes = decode_change_set::<JsonKey, Value>(&change_set)
                        .map_err(|e| TransportError::Remote(e.to_string()))?;
                    tracked.clone_changes(&changes);
                }
            }
            Ok::<(), TransportError>(())
        })();
        let (items, changes) = tracked.into_parts();
        state.items = items;
        outcome?;

        if changes.is_empty() {
            return Ok(None);
        }
        encode_change_set(&changes)
            .map(Some)
            .map_err(|e| TransportError::Codec(e.to_string()))
    }

    fn query(&self, command: HubCommand) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        state.commands.push(command.target().to_string());
        match command {
            HubCommand::Initialize { key_field } => {
                state.key_field = Some(key_field);
                Ok(Value::Null)
            }
            HubCommand::GetKeyValuePairs => Ok(snapshot_value(state.items.key_values())),
            HubCommand::GetKeyValuePairsFiltered { filter } => {
                let filter = JsonPredicateCodec
                    .decode(&filter)
                    .map_err(|e| TransportError::Remote(e.to_string()))?;
                Ok(snapshot_value(
                    state
                        .items
                        .key_values()
                        .into_iter()
                        .filter(|(_, item)| filter.matches(item)),
                ))
            }
            _ => Ok(Value::Null),
        }
    }

    fn broadcast(&self, origin: Option<&HubClient>, payload: &str) {
        let clients: Vec<Arc<HubClient>> = {
            let mut state = self.state.lock();
            state.clients.retain(|c| c.strong_count() > 0);
            state.clients.iter().filter_map(Weak::upgrade).collect()
        };
        for client in clients {
            if origin.is_some_and(|o| std::ptr::eq(o, Arc::as_ptr(&client))) {
                continue;
            }
            client.deliver(CHANGES_EVENT, payload);
        }
    }
}

impl HubClient {
    fn deliver(&self, event: &str, payload: &str) {
        let handlers: Vec<PushHandler> = self
            .push_handlers
            .lock()
            .iter()
            .filter(|(e, _)| e == event)
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(payload.to_string());
        }
    }

    /// Push raw text to this client only.
    pub fn push_raw(&self, payload: &str) {
        self.deliver(CHANGES_EVENT, payload);
    }

    /// Simulate the transport re-establishing its connection.
    pub fn reconnect(&self) {
        let handlers = self.reconnect_handlers.lock().clone();
        for handler in handlers {
            handler();
        }
    }
}

#[async_trait]
impl Transport for HubClient {
    async fn invoke(&self, command: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
        match command {
            HubCommand::INITIALIZE
            | HubCommand::GET_KEY_VALUE_PAIRS
            | HubCommand::GET_KEY_VALUE_PAIRS_FILTERED => {
                let parsed = HubCommand::parse(command, arguments)
                    .map_err(|e| TransportError::Remote(e.to_string()))?;
                self.hub.query(parsed)
            }
            _ => {
                if let Some(payload) = self.hub.execute(command, arguments)? {
                    self.hub.broadcast(Some(self), &payload);
                }
                Ok(Value::Null)
            }
        }
    }

    fn on_push(&self, event: &str, handler: PushHandler) {
        self.push_handlers.lock().push((event.to_string(), handler));
    }

    fn on_reconnected(&self, handler: ReconnectHandler) {
        self.reconnect_handlers.lock().push(handler);
    }

    async fn shutdown(&self) {}
}
