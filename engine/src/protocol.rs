//! Hub message protocol definitions.
//!
//! All frames are JSON-encoded and use snake_case for field names. A client
//! invokes named hub commands; the server answers each invocation with a
//! completion and pushes change sets produced by other clients.

use crate::error::{Error, Result};
use crate::KeyField;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push event carrying an encoded change set.
pub const CHANGES_EVENT: &str = "Changes";

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Invoke a hub command.
    Invocation {
        /// Correlates the completion with this invocation
        invocation_id: u64,
        /// Command name
        target: String,
        /// Positional arguments
        #[serde(default)]
        arguments: Vec<Value>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Result of an invocation.
    Completion {
        invocation_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Server-initiated event.
    Push {
        event: String,
        payload: String,
    },

    /// Response to ping.
    Pong,

    /// A frame the server could not attribute to an invocation.
    Error { message: String },
}

impl ServerFrame {
    /// A successful completion.
    pub fn completed(invocation_id: u64, result: Value) -> Self {
        ServerFrame::Completion {
            invocation_id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed completion.
    pub fn failed(invocation_id: u64, error: impl Into<String>) -> Self {
        ServerFrame::Completion {
            invocation_id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// A change-set push.
    pub fn changes(payload: String) -> Self {
        ServerFrame::Push {
            event: CHANGES_EVENT.to_string(),
            payload,
        }
    }
}

/// The commands a hub understands.
#[derive(Debug, Clone, PartialEq)]
pub enum HubCommand {
    /// Declare where item keys live. Must precede commands carrying whole items.
    Initialize { key_field: KeyField },
    /// Fetch the full snapshot.
    GetKeyValuePairs,
    /// Fetch the snapshot narrowed by an encoded filter.
    GetKeyValuePairsFiltered { filter: String },
    AddOrUpdateObjects { items: Vec<Value> },
    /// Store one item under a key chosen by the sender.
    AddOrUpdateValueWithKey { item: Value, key: Value },
    RemoveItems { items: Vec<Value> },
    RemoveKeys { keys: Vec<Value> },
    RefreshKeys { keys: Vec<Value> },
    /// Replay an encoded change set.
    Clone { change_set: String },
}

impl HubCommand {
    pub const INITIALIZE: &'static str = "Initialize";
    pub const GET_KEY_VALUE_PAIRS: &'static str = "GetKeyValuePairs";
    pub const GET_KEY_VALUE_PAIRS_FILTERED: &'static str = "GetKeyValuePairsFiltered";
    pub const ADD_OR_UPDATE_OBJECTS: &'static str = "AddOrUpdateObjects";
    pub const ADD_OR_UPDATE_VALUE_WITH_KEY: &'static str = "AddOrUpdateValueWithKey";
    pub const REMOVE_ITEMS: &'static str = "RemoveItems";
    pub const REMOVE_KEYS: &'static str = "RemoveKeys";
    pub const REFRESH_KEYS: &'static str = "RefreshKeys";
    pub const CLONE: &'static str = "Clone";

    /// Command name as sent on the wire.
    pub fn target(&self) -> &'static str {
        match self {
            HubCommand::Initialize { .. } => Self::INITIALIZE,
            HubCommand::GetKeyValuePairs => Self::GET_KEY_VALUE_PAIRS,
            HubCommand::GetKeyValuePairsFiltered { .. } => Self::GET_KEY_VALUE_PAIRS_FILTERED,
            HubCommand::AddOrUpdateObjects { .. } => Self::ADD_OR_UPDATE_OBJECTS,
            HubCommand::AddOrUpdateValueWithKey { .. } => Self::ADD_OR_UPDATE_VALUE_WITH_KEY,
            HubCommand::RemoveItems { .. } => Self::REMOVE_ITEMS,
            HubCommand::RemoveKeys { .. } => Self::REMOVE_KEYS,
            HubCommand::RefreshKeys { .. } => Self::REFRESH_KEYS,
            HubCommand::Clone { .. } => Self::CLONE,
        }
    }

    /// Whether the command mutates the hub's collection.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            HubCommand::AddOrUpdateObjects { .. }
                | HubCommand::AddOrUpdateValueWithKey { .. }
                | HubCommand::RemoveItems { .. }
                | HubCommand::RemoveKeys { .. }
                | HubCommand::RefreshKeys { .. }
                | HubCommand::Clone { .. }
        )
    }

    /// Positional arguments as sent on the wire.
    pub fn into_arguments(self) -> Vec<Value> {
        match self {
            HubCommand::Initialize { key_field } => vec![Value::String(key_field.path().into())],
            HubCommand::GetKeyValuePairs => Vec::new(),
            HubCommand::GetKeyValuePairsFiltered { filter } => vec![Value::String(filter)],
            HubCommand::AddOrUpdateObjects { items } | HubCommand::RemoveItems { items } => {
                vec![Value::Array(items)]
            }
            HubCommand::AddOrUpdateValueWithKey { item, key } => vec![item, key],
            HubCommand::RemoveKeys { keys } | HubCommand::RefreshKeys { keys } => {
                vec![Value::Array(keys)]
            }
            HubCommand::Clone { change_set } => vec![Value::String(change_set)],
        }
    }

    /// Parse an invocation's target and arguments.
    pub fn parse(target: &str, arguments: Vec<Value>) -> Result<Self> {
        let mut arguments = arguments.into_iter();
        let mut next = || {
            arguments
                .next()
                .ok_or_else(|| Error::Deserialization(format!("{target}: missing argument")))
        };

        let command = match target {
            Self::INITIALIZE => HubCommand::Initialize {
                key_field: KeyField::new(expect_string(target, next()?)?),
            },
            Self::GET_KEY_VALUE_PAIRS => HubCommand::GetKeyValuePairs,
            Self::GET_KEY_VALUE_PAIRS_FILTERED => HubCommand::GetKeyValuePairsFiltered {
                filter: expect_string(target, next()?)?,
            },
            Self::ADD_OR_UPDATE_OBJECTS => HubCommand::AddOrUpdateObjects {
                items: expect_array(target, next()?)?,
            },
            Self::ADD_OR_UPDATE_VALUE_WITH_KEY => HubCommand::AddOrUpdateValueWithKey {
                item: next()?,
                key: next()?,
            },
            Self::REMOVE_ITEMS => HubCommand::RemoveItems {
                items: expect_array(target, next()?)?,
            },
            Self::REMOVE_KEYS => HubCommand::RemoveKeys {
                keys: expect_array(target, next()?)?,
            },
            Self::REFRESH_KEYS => HubCommand::RefreshKeys {
                keys: expect_array(target, next()?)?,
            },
            Self::CLONE => HubCommand::Clone {
                change_set: expect_string(target, next()?)?,
            },
            other => {
                return Err(Error::Deserialization(format!("unknown command '{other}'")));
            }
        };
        Ok(command)
    }
}

fn expect_string(target: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::Deserialization(format!(
            "{target}: expected string argument, got {other}"
        ))),
    }
}

fn expect_array(target: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(values) => Ok(values),
        other => Err(Error::Deserialization(format!(
            "{target}: expected array argument, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_deserialization() {
        let json = r#"{"type": "invocation", "invocation_id": 3, "target": "GetKeyValuePairs"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                assert_eq!(invocation_id, 3);
                assert_eq!(target, "GetKeyValuePairs");
                assert!(arguments.is_empty());
            }
            _ => panic!("Expected Invocation frame"),
        }

        let frame: ClientFrame = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn test_server_frame_serialization() {
        let json = serde_json::to_string(&ServerFrame::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let json = serde_json::to_string(&ServerFrame::failed(9, "boom")).unwrap();
        assert!(json.contains(r#""type":"completion""#));
        assert!(json.contains(r#""error":"boom""#));
        assert!(!json.contains("result"));

        let frame = ServerFrame::changes("{}".to_string());
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["event"], json!("Changes"));
    }

    #[test]
    fn commands_round_trip_through_arguments() {
        let commands = vec![
            HubCommand::Initialize {
                key_field: KeyField::new("Id"),
            },
            HubCommand::GetKeyValuePairs,
            HubCommand::GetKeyValuePairsFiltered {
                filter: r#"{"op":"all"}"#.into(),
            },
            HubCommand::AddOrUpdateObjects {
                items: vec![json!({"Id": "a"})],
            },
            HubCommand::AddOrUpdateValueWithKey {
                item: json!({"Id": "a"}),
                key: json!("x"),
            },
            HubCommand::RemoveKeys {
                keys: vec![json!("a"), json!(2)],
            },
            HubCommand::Clone {
                change_set: "{}".into(),
            },
        ];

        for command in commands {
            let target = command.target();
            let parsed = HubCommand::parse(target, command.clone().into_arguments()).unwrap();
            assert_eq!(parsed, command);
        }
    }

    #[test]
    fn parse_rejects_bad_invocations() {
        assert!(HubCommand::parse("Teleport", vec![]).is_err());
        assert!(HubCommand::parse("RemoveKeys", vec![]).is_err());
        assert!(HubCommand::parse("RemoveKeys", vec![json!("a")]).is_err());
        assert!(HubCommand::parse("Initialize", vec![json!(1)]).is_err());
        assert!(HubCommand::parse("AddOrUpdateValueWithKey", vec![json!({"Id": "a"})]).is_err());
    }

    #[test]
    fn mutations() {
        assert!(!HubCommand::GetKeyValuePairs.is_mutation());
        assert!(HubCommand::RefreshKeys { keys: vec![] }.is_mutation());
    }
}
