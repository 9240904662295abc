//! # Keysync Client
//!
//! An observable keyed cache whose contents are mirrored from a keysync hub.
//!
//! The client keeps a full local copy of one collection. Reads are served
//! from the copy, local edits apply to it immediately and are forwarded to
//! the hub in the background, and edits made by other clients arrive as
//! pushed change sets.
//!
//! ## Pieces
//!
//! - [`ObservableCache`] - the public surface: subscriptions, reads, edits
//! - [`RemoteUpdater`] - handed to edit closures; mutates locally and queues
//!   the matching intent for the hub
//! - [`Transport`] - request/response plus server push; [`WsTransport`] is
//!   the WebSocket implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use keysync_client::{ObservableCache, TransportConfig, WsTransport};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Person {
//!     id: String,
//!     age: u32,
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = WsTransport::connect(TransportConfig::new("ws://localhost:3000/hub/people")).await?;
//! let people = ObservableCache::builder(Arc::new(transport))
//!     .key_selector("id", |p: &Person| p.id.clone())
//!     .build()?;
//!
//! let mut changes = people.connect(None).await?;
//! people
//!     .add_or_update(vec![Person { id: "a".into(), age: 44 }])
//!     .await?;
//!
//! while let Some(batch) = changes.next().await {
//!     println!("{} changes", batch.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod observable;
pub mod reader_writer;
pub mod selector;
pub mod transport;
pub mod updater;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, TransportConfig};
pub use error::{Error, Result, TransportError};
pub use observable::{ChangeStream, ObservableCache, ObservableCacheBuilder};
pub use reader_writer::{Phase, PreviewHandler};
pub use selector::{CacheItem, CacheKey, KeySelector};
pub use transport::{PushHandler, ReconnectHandler, Transport, WsTransport};
pub use updater::RemoteUpdater;

pub use keysync_engine::{Cache, Change, ChangeReason, ChangeSet, Filter, KeyField};
