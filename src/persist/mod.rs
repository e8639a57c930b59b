pub mod memory;
pub mod sled_store;

use crate::error::Result;
use crate::snapshot::SnapshotMeta;

pub use memory::MemorySnapshotStore;
pub use sled_store::SledSnapshotStore;

/// Storage for persisted snapshot text. Implementations must be thread-safe.
///
/// Entries are addressed by name; [`snapshot_name`] builds the name used for
/// one context.
pub trait SnapshotStore: Send + Sync {
    /// Snapshot text stored under `name`, if any.
    fn load(&self, name: &str) -> Result<Option<String>>;

    /// Stores snapshot text together with its metadata, replacing any
    /// previous entry.
    fn save(&self, name: &str, content: &str, meta: &SnapshotMeta) -> Result<()>;

    /// Metadata of the snapshot stored under `name`.
    fn meta(&self, name: &str) -> Result<Option<SnapshotMeta>>;

    fn remove(&self, name: &str) -> Result<()>;

    /// Names of all stored snapshots.
    fn names(&self) -> Result<Vec<String>>;
}

/// Prefix used for snapshot names when none is configured.
pub const DEFAULT_PREFIX: &str = "flags";

/// Name of the snapshot belonging to `context_key`.
pub fn snapshot_name(prefix: &str, context_key: &str) -> String {
    format!("{}-{}", prefix, context_key)
}
