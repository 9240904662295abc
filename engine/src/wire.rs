//! Wire format for change sets and snapshots.
//!
//! A change set travels as
//!
//! ```json
//! {"ChangeSetContents": [
//!   {"Reason": "Update", "Key": "a", "Current": {..}, "Previous": {..},
//!    "CurrentIndex": -1, "PreviousIndex": -1}
//! ]}
//! ```
//!
//! `Previous` is only written for `Update`. A snapshot is a JSON object mapping
//! each key (as a member name) to its item.

use crate::error::{Error, Result};
use crate::{Change, ChangeReason, ChangeSet, JsonKey, NO_INDEX};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireChangeRef<'a, K, T> {
    reason: ChangeReason,
    key: &'a K,
    current: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous: Option<&'a T>,
    current_index: i32,
    previous_index: i32,
}

#[derive(Deserialize)]
#[serde(
    rename_all = "PascalCase",
    bound(deserialize = "K: Deserialize<'de>, T: Deserialize<'de>")
)]
struct WireChange<K, T> {
    reason: ChangeReason,
    key: K,
    current: T,
    #[serde(default)]
    previous: Option<T>,
    #[serde(default = "no_index")]
    current_index: i32,
    #[serde(default = "no_index")]
    previous_index: i32,
}

fn no_index() -> i32 {
    NO_INDEX
}

impl<K: Serialize, T: Serialize> Serialize for Change<K, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let previous = match self.reason() {
            ChangeReason::Update => self.previous(),
            _ => None,
        };
        WireChangeRef {
            reason: self.reason(),
            key: self.key(),
            current: self.current(),
            previous,
            current_index: self.current_index(),
            previous_index: self.previous_index(),
        }
        .serialize(serializer)
    }
}

impl<'de, K, T> Deserialize<'de> for Change<K, T>
where
    K: Deserialize<'de>,
    T: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireChange::<K, T>::deserialize(deserializer)?;
        match wire.reason {
            ChangeReason::Update => match wire.previous {
                Some(previous) => Ok(Change::update(wire.key, wire.current, previous)),
                None => Err(serde::de::Error::missing_field("Previous")),
            },
            ChangeReason::Move => Ok(Change::moved(
                wire.key,
                wire.current,
                wire.current_index,
                wire.previous_index,
            )),
            reason => Ok(Change::new(reason, wire.key, wire.current, None)),
        }
    }
}

#[derive(Serialize)]
struct WireChangeSetRef<'a, K, T> {
    #[serde(rename = "ChangeSetContents")]
    contents: &'a [Change<K, T>],
}

#[derive(Deserialize)]
struct WireChangeSet<K, T> {
    #[serde(rename = "ChangeSetContents", default = "Vec::new")]
    contents: Vec<Change<K, T>>,
}

impl<K: Serialize, T: Serialize> Serialize for ChangeSet<K, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireChangeSetRef {
            contents: self.as_slice(),
        }
        .serialize(serializer)
    }
}

impl<'de, K, T> Deserialize<'de> for ChangeSet<K, T>
where
    K: Deserialize<'de>,
    T: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        WireChangeSet::<K, T>::deserialize(deserializer).map(|wire| wire.contents.into())
    }
}

/// Encode a change set as wire text.
pub fn encode_change_set<K: Serialize, T: Serialize>(changes: &ChangeSet<K, T>) -> Result<String> {
    serde_json::to_string(changes).map_err(Error::serialization)
}

/// Decode a change set from wire text.
pub fn decode_change_set<K, T>(text: &str) -> Result<ChangeSet<K, T>>
where
    K: DeserializeOwned,
    T: DeserializeOwned,
{
    serde_json::from_str(text).map_err(Error::deserialization)
}

/// Build a snapshot object from JSON key/item pairs.
pub fn snapshot_value(pairs: impl IntoIterator<Item = (JsonKey, Value)>) -> Value {
    let map: Map<String, Value> = pairs
        .into_iter()
        .map(|(key, item)| (key.to_string(), item))
        .collect();
    Value::Object(map)
}

/// Decode a snapshot object into typed key/item pairs.
pub fn decode_snapshot<K, T>(value: Value) -> Result<Vec<(K, T)>>
where
    K: DeserializeOwned + Eq + Hash,
    T: DeserializeOwned,
{
    let map: HashMap<K, T> = serde_json::from_value(value).map_err(Error::deserialization)?;
    Ok(map.into_iter().collect())
}
