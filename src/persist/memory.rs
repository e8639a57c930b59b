use std::collections::HashMap;

use parking_lot::RwLock;

use super::SnapshotStore;
use crate::error::Result;
use crate::snapshot::SnapshotMeta;

/// In-memory snapshot storage backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemorySnapshotStore {
    data: RwLock<HashMap<String, (String, SnapshotMeta)>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let data = self.data.read();
        Ok(data.get(name).map(|(content, _)| content.clone()))
    }

    fn save(&self, name: &str, content: &str, meta: &SnapshotMeta) -> Result<()> {
        let mut data = self.data.write();
        data.insert(name.to_string(), (content.to_string(), meta.clone()));
        Ok(())
    }

    fn meta(&self, name: &str) -> Result<Option<SnapshotMeta>> {
        let data = self.data.read();
        Ok(data.get(name).map(|(_, meta)| meta.clone()))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.data.write().remove(name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        let data = self.data.read();
        let mut names: Vec<String> = data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
