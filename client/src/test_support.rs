//! In-process transport used by unit tests.

use crate::error::TransportError;
use crate::transport::{PushHandler, ReconnectHandler, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Records invocations and answers snapshot reads with a fixed value.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub calls: Mutex<Vec<(String, Vec<Value>)>>,
    pub snapshot: Mutex<Option<Value>>,
    pub fail: bool,
    pub push_handlers: Mutex<Vec<(String, PushHandler)>>,
    pub reconnect_handlers: Mutex<Vec<ReconnectHandler>>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn targets(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn push(&self, event: &str, payload: &str) {
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
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn invoke(&self, command: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
        self.calls.lock().push((command.to_string(), arguments));
        if self.fail {
            return Err(TransportError::NotConnected);
        }
        match command {
            "GetKeyValuePairs" | "GetKeyValuePairsFiltered" => {
                Ok(self.snapshot.lock().clone().unwrap_or_else(|| json!({})))
            }
            _ => Ok(Value::Null),
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
