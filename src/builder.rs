use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

use crate::client::{FlagCache, Persistence};
use crate::error::Result;
use crate::persist::{MemorySnapshotStore, SledSnapshotStore, SnapshotStore, DEFAULT_PREFIX};

enum Backend {
    None,
    Memory,
    Sled(PathBuf),
    Custom(Box<dyn SnapshotStore>),
}

/// Chained configuration for a [`FlagCache`].
///
/// # Examples
/// ```
/// use flagcache_lib::FlagCache;
///
/// // No persistence
/// let cache = FlagCache::builder().build().unwrap();
///
/// // Snapshots kept in memory for the context "user-42"
/// let cache = FlagCache::builder()
///     .context_key("user-42")
///     .memory_store()
///     .build()
///     .unwrap();
/// assert_eq!(cache.snapshot_name().as_deref(), Some("flags-user-42"));
/// ```
pub struct FlagCacheBuilder {
    context_key: String,
    prefix: String,
    backend: Backend,
    restore_on_build: bool,
}

impl FlagCacheBuilder {
    pub fn new() -> Self {
        Self {
            context_key: "default".into(),
            prefix: DEFAULT_PREFIX.into(),
            backend: Backend::None,
            restore_on_build: true,
        }
    }

    /// Key of the context whose snapshot is persisted and restored.
    pub fn context_key(mut self, key: &str) -> Self {
        self.context_key = key.to_string();
        self
    }

    /// Prefix of persisted snapshot names (`{prefix}-{context_key}`).
    pub fn snapshot_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn memory_store(mut self) -> Self {
        self.backend = Backend::Memory;
        self
    }

    /// Persist snapshots in a sled database at `path`, opened on build.
    pub fn sled_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = Backend::Sled(path.into());
        self
    }

    pub fn snapshot_store(mut self, store: impl SnapshotStore + 'static) -> Self {
        self.backend = Backend::Custom(Box::new(store));
        self
    }

    /// Whether `build` loads the persisted snapshot of the context.
    /// Defaults to `true`.
    pub fn restore_on_build(mut self, restore: bool) -> Self {
        self.restore_on_build = restore;
        self
    }

    /// Creates the cache. A persisted snapshot that cannot be restored is
    /// logged and ignored; failing to open the backend is an error.
    pub fn build(self) -> Result<FlagCache> {
        let backend: Option<Box<dyn SnapshotStore>> = match self.backend {
            Backend::None => None,
            Backend::Memory => Some(Box::new(MemorySnapshotStore::new())),
            Backend::Sled(path) => Some(Box::new(SledSnapshotStore::open(path)?)),
            Backend::Custom(store) => Some(store),
        };

        let persistence = backend.map(|backend| Persistence {
            backend,
            prefix: self.prefix,
            context_key: Mutex::new(self.context_key),
            last_hash: Mutex::new(None),
        });
        let cache = FlagCache::with_persistence(persistence);

        if self.restore_on_build {
            if let Err(e) = cache.load_persisted() {
                warn!(error = %e, "ignoring unreadable persisted flag snapshot");
            }
        }
        Ok(cache)
    }
}

impl Default for FlagCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotMeta;
    use serde_json::json;

    fn backend_with(name: &str, text: &str) -> MemorySnapshotStore {
        let backend = MemorySnapshotStore::new();
        backend
            .save(name, text, &SnapshotMeta::for_snapshot(text, 1))
            .unwrap();
        backend
    }

    #[test]
    fn test_build_restores_persisted_snapshot() {
        let cache = FlagCache::builder()
            .context_key("alice")
            .snapshot_prefix("ld")
            .snapshot_store(backend_with("ld-alice", r#"{"f1":{"version":2,"value":[1,2]}}"#))
            .build()
            .unwrap();
        assert_eq!(cache.flag("f1").unwrap().value, json!([1, 2]));
        assert!(cache.store().is_initialized());
    }

    #[test]
    fn test_build_without_restore() {
        let cache = FlagCache::builder()
            .context_key("alice")
            .snapshot_store(backend_with("flags-alice", r#"{"f1":{"version":2,"value":1}}"#))
            .restore_on_build(false)
            .build()
            .unwrap();
        assert!(cache.flag("f1").is_none());
    }

    #[test]
    fn test_build_ignores_corrupt_snapshot() {
        let cache = FlagCache::builder()
            .context_key("alice")
            .snapshot_store(backend_with("flags-alice", "{broken"))
            .build()
            .unwrap();
        assert!(cache.all_flags().is_empty());
    }

    #[test]
    fn test_sled_store_survives_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FlagCache::builder()
                .context_key("bob")
                .sled_store(dir.path())
                .build()
                .unwrap();
            cache
                .apply_batch(vec![crate::FlagUpdate::upsert("f1", 1, json!("on"))])
                .unwrap();
            assert!(cache.persist().unwrap());
        }

        let cache = FlagCache::builder()
            .context_key("bob")
            .sled_store(dir.path())
            .build()
            .unwrap();
        assert_eq!(cache.flag("f1").unwrap().value, json!("on"));
        assert!(!cache.persist().unwrap());
    }
}
