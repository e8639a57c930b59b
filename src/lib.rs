//! Client-side feature flag cache.
//!
//! Holds the flag state delivered by a sync layer, answers reads against it,
//! notifies listeners when individual flags change, and saves/restores the
//! whole cache as a JSON snapshot.
//!
//! ```
//! use std::sync::Arc;
//!
//! use flagcache_lib::{ChangeKind, FlagCache, FlagUpdate, SharedListener};
//! use serde_json::json;
//!
//! let cache = FlagCache::new();
//! let listener: SharedListener = Arc::new(|key: &str, kind: ChangeKind| {
//!     println!("{key} {kind}");
//! });
//! cache.register_listener("checkout", &listener);
//!
//! let changes = cache
//!     .apply_batch(vec![FlagUpdate::upsert("checkout", 1, json!(true))])
//!     .unwrap();
//! assert_eq!(changes.kind_of("checkout"), Some(ChangeKind::Added));
//!
//! let saved = cache.save().unwrap();
//! let other = FlagCache::new();
//! other.restore(&saved).unwrap();
//! assert_eq!(other.flag("checkout").unwrap().value, json!(true));
//! ```

pub mod builder;
pub mod client;
pub mod error;
pub mod flag;
pub mod listeners;
pub mod persist;
pub mod snapshot;
pub mod store;

pub use builder::FlagCacheBuilder;
pub use client::FlagCache;
pub use error::{FlagCacheError, Result};
pub use flag::{ChangeKind, ChangeSet, Flag, FlagChange, FlagUpdate};
pub use listeners::{FlagListener, ListenerId, ListenerRegistry, SharedListener};
pub use persist::{MemorySnapshotStore, SledSnapshotStore, SnapshotStore};
pub use snapshot::SnapshotMeta;
pub use store::FlagStore;
