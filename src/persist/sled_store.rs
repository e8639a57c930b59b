use std::path::Path;

use super::SnapshotStore;
use crate::error::{FlagCacheError, Result};
use crate::snapshot::SnapshotMeta;

const SNAPSHOT_PREFIX: &str = "snapshot:";
const META_PREFIX: &str = "meta:";

/// Persistent snapshot storage backed by sled.
pub struct SledSnapshotStore {
    db: sled::Db,
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> FlagCacheError {
    FlagCacheError::Storage(format!("{}: {}", context, e))
}

impl SledSnapshotStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(data_dir).map_err(|e| storage_err("failed to open sled db", e))?;
        Ok(Self::new(db))
    }

    fn snapshot_key(name: &str) -> String {
        format!("{}{}", SNAPSHOT_PREFIX, name)
    }

    fn meta_key(name: &str) -> String {
        format!("{}{}", META_PREFIX, name)
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let Some(ivec) = self
            .db
            .get(Self::snapshot_key(name))
            .map_err(|e| storage_err("failed to read snapshot", e))?
        else {
            return Ok(None);
        };
        let text = String::from_utf8(ivec.to_vec())
            .map_err(|e| storage_err("snapshot is not valid utf-8", e))?;
        Ok(Some(text))
    }

    fn save(&self, name: &str, content: &str, meta: &SnapshotMeta) -> Result<()> {
        let meta_bytes = serde_json::to_vec(meta)?;

        self.db
            .insert(Self::snapshot_key(name), content.as_bytes())
            .map_err(|e| storage_err("failed to store snapshot", e))?;

        self.db
            .insert(Self::meta_key(name), meta_bytes)
            .map_err(|e| storage_err("failed to store meta", e))?;

        self.db
            .flush()
            .map_err(|e| storage_err("failed to flush", e))?;

        Ok(())
    }

    fn meta(&self, name: &str) -> Result<Option<SnapshotMeta>> {
        let Some(ivec) = self
            .db
            .get(Self::meta_key(name))
            .map_err(|e| storage_err("failed to read meta", e))?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&ivec)?))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.db
            .remove(Self::snapshot_key(name))
            .map_err(|e| storage_err("failed to remove snapshot", e))?;
        self.db
            .remove(Self::meta_key(name))
            .map_err(|e| storage_err("failed to remove meta", e))?;
        self.db
            .flush()
            .map_err(|e| storage_err("failed to flush", e))?;
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        self.db
            .scan_prefix(SNAPSHOT_PREFIX)
            .map(|item| {
                let (key, _) = item.map_err(|e| storage_err("failed to read key", e))?;
                let key_str = std::str::from_utf8(&key)
                    .map_err(|e| storage_err("invalid key encoding", e))?;
                key_str
                    .strip_prefix(SNAPSHOT_PREFIX)
                    .map(str::to_string)
                    .ok_or_else(|| FlagCacheError::Storage("unexpected key format".to_string()))
            })
            .collect()
    }
}
