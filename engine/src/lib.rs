//! # Keysync Engine
//!
//! Change-aware keyed caches and the change-set protocol shared by the
//! keysync client and server.
//!
//! This crate holds the pure part of keysync: the data structures that record
//! what changed in a keyed collection, and the formats those changes travel
//! in. It performs no IO.
//!
//! ## Design Principles
//!
//! - **No IO**: networking lives in `keysync-client` and `keysync-server`
//! - **Minimal diffs**: repeated edits of one key coalesce before capture
//! - **Replayable**: a captured change set replayed against the state before
//!   the edit reproduces the state after it
//!
//! ## Core Concepts
//!
//! ### Changes
//!
//! A [`Change`] records one mutation of one key with a [`ChangeReason`]
//! (`Add`, `Update`, `Remove`, `Refresh`, `Move`). A [`ChangeSet`] is the
//! ordered batch produced by one commit.
//!
//! ### Caches
//!
//! - [`Cache`] - a plain keyed store
//! - [`ChangeAwareCache`] - records every mutation until
//!   [`ChangeAwareCache::capture_changes`] hands them out
//!
//! Both implement [`KeyedStore`], the mutation surface edit code is written
//! against.
//!
//! ### Wire
//!
//! [`wire`] defines the JSON shape of change sets and snapshots, [`protocol`]
//! the frames exchanged with a hub, and [`Filter`] the predicates a client can
//! ask the server to apply.
//!
//! ## Quick Start
//!
//! ```rust
//! use keysync_engine::{ChangeAwareCache, ChangeReason, KeyedStore};
//!
//! let mut cache = ChangeAwareCache::new();
//!
//! cache.add_or_update(44, "a");
//! cache.add_or_update(43, "a");
//! cache.refresh(&"a");
//!
//! let changes = cache.capture_changes();
//! let reasons: Vec<_> = changes.iter().map(|c| c.reason()).collect();
//! assert_eq!(
//!     reasons,
//!     vec![ChangeReason::Add, ChangeReason::Update, ChangeReason::Refresh]
//! );
//!
//! // Capture is consuming
//! assert!(cache.capture_changes().is_empty());
//! ```

pub mod cache;
pub mod change;
pub mod change_aware_cache;
pub mod change_set;
pub mod error;
pub mod filter;
pub mod key;
pub mod narrow;
pub mod protocol;
pub mod wire;

// Re-export main types at crate root
pub use cache::{Cache, KeyedStore};
pub use change::{Change, ChangeReason, NO_INDEX};
pub use change_aware_cache::ChangeAwareCache;
pub use change_set::{ChangeSet, ChangeSummary};
pub use error::{Error, Result};
pub use filter::{Filter, JsonPredicateCodec, PredicateCodec};
pub use key::{JsonKey, KeyField};
pub use narrow::ChangeFilter;
pub use protocol::{ClientFrame, HubCommand, ServerFrame, CHANGES_EVENT};
pub use wire::{decode_change_set, decode_snapshot, encode_change_set, snapshot_value};
