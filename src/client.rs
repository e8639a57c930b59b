use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::builder::FlagCacheBuilder;
use crate::error::Result;
use crate::flag::{ChangeSet, Flag, FlagUpdate};
use crate::listeners::{ListenerRegistry, SharedListener};
use crate::persist::{snapshot_name, SnapshotStore};
use crate::snapshot::{self, SnapshotMeta};
use crate::store::FlagStore;

pub(crate) struct Persistence {
    pub(crate) backend: Box<dyn SnapshotStore>,
    pub(crate) prefix: String,
    pub(crate) context_key: Mutex<String>,
    /// Hash of the snapshot last written or read, to skip redundant writes.
    pub(crate) last_hash: Mutex<Option<String>>,
}

impl Persistence {
    fn name(&self) -> String {
        snapshot_name(&self.prefix, &self.context_key.lock())
    }
}

/// Flag cache owned by one SDK client: the flag store, its listeners and
/// optional snapshot persistence.
///
/// Every mutation goes through the update guard: the store is changed, the
/// change is visible to readers, and only then are listeners notified, all
/// before the call returns. Listener callbacks run on the calling thread with
/// the guard held, so a callback may read flags and (un)register listeners but
/// must not call [`apply_batch`](Self::apply_batch),
/// [`replace_all`](Self::replace_all), [`restore`](Self::restore),
/// [`reset`](Self::reset) or [`identify`](Self::identify) on the same cache.
pub struct FlagCache {
    store: FlagStore,
    listeners: ListenerRegistry,
    update_guard: Mutex<()>,
    persistence: Option<Persistence>,
}

impl FlagCache {
    /// A cache without persistence.
    pub fn new() -> Self {
        Self::with_persistence(None)
    }

    pub fn builder() -> FlagCacheBuilder {
        FlagCacheBuilder::new()
    }

    pub(crate) fn with_persistence(persistence: Option<Persistence>) -> Self {
        Self {
            store: FlagStore::new(),
            listeners: ListenerRegistry::new(),
            update_guard: Mutex::new(()),
            persistence,
        }
    }

    /// Applies a batch from the sync layer and notifies listeners of every
    /// key whose state changed.
    pub fn apply_batch(&self, updates: Vec<FlagUpdate>) -> Result<ChangeSet> {
        let _guard = self.update_guard.lock();
        let changes = self.store.apply_batch(updates)?;
        if changes.skipped > 0 {
            warn!(skipped = changes.skipped, "dropped malformed entries from flag batch");
        }
        self.listeners.dispatch(&changes);
        Ok(changes)
    }

    /// Replaces the whole store with `flags` (a full put from the sync layer)
    /// and notifies listeners of the differences.
    pub fn replace_all(&self, flags: Vec<Flag>) -> Result<ChangeSet> {
        let _guard = self.update_guard.lock();
        let changes = self.store.replace_all(flags)?;
        self.listeners.dispatch(&changes);
        Ok(changes)
    }

    /// Empties the store without notifying listeners.
    pub fn reset(&self) {
        let _guard = self.update_guard.lock();
        self.store.reset();
    }

    /// Serializes the current flags.
    pub fn save(&self) -> Result<String> {
        snapshot::save(&self.store)
    }

    /// Restores flags from snapshot text and notifies listeners of the
    /// differences. On error nothing changes.
    pub fn restore(&self, text: &str) -> Result<ChangeSet> {
        let _guard = self.update_guard.lock();
        let changes = self.restore_locked(text)?;
        self.listeners.dispatch(&changes);
        Ok(changes)
    }

    fn restore_locked(&self, text: &str) -> Result<ChangeSet> {
        snapshot::restore_into(&self.store, text).inspect_err(|e| {
            warn!(error = %e, "failed to restore flag snapshot");
        })
    }

    pub fn flag(&self, key: &str) -> Option<Flag> {
        self.store.get(key)
    }

    pub fn all_flags(&self) -> Vec<Flag> {
        self.store.get_all()
    }

    pub fn all_values(&self) -> BTreeMap<String, Value> {
        self.store.all_values()
    }

    pub fn store(&self) -> &FlagStore {
        &self.store
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Registers `listener` for changes to `flag_key`. Returns `false` only
    /// if the registration could not be allocated.
    pub fn register_listener(&self, flag_key: &str, listener: &SharedListener) -> bool {
        match self.listeners.add(flag_key, listener) {
            Ok(()) => true,
            Err(e) => {
                warn!(flag_key, error = %e, "failed to register flag listener");
                false
            }
        }
    }

    pub fn unregister_listener(&self, flag_key: &str, listener: &SharedListener) {
        self.listeners.remove(flag_key, listener);
    }

    /// Name under which the current context's snapshot is persisted.
    pub fn snapshot_name(&self) -> Option<String> {
        self.persistence.as_ref().map(Persistence::name)
    }

    /// Writes the current snapshot to the persistence backend.
    ///
    /// Returns `false` when no backend is configured or the stored snapshot
    /// already has the same content.
    pub fn persist(&self) -> Result<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let name = persistence.name();
        let flags = self.store.get_all();
        let flags_count = flags.len();
        let text = snapshot::save_flags(flags)?;
        let meta = SnapshotMeta::for_snapshot(&text, flags_count);

        let mut last_hash = persistence.last_hash.lock();
        if last_hash.is_none() {
            *last_hash = persistence.backend.meta(&name)?.map(|meta| meta.hash);
        }
        if last_hash.as_deref() == Some(meta.hash.as_str()) {
            debug!(%name, "snapshot unchanged, skipping write");
            return Ok(false);
        }

        persistence.backend.save(&name, &text, &meta)?;
        info!(%name, flags = meta.flags_count, "persisted flag snapshot");
        *last_hash = Some(meta.hash);
        Ok(true)
    }

    /// Restores the current context's snapshot from the persistence backend.
    /// Returns `false` when no backend is configured or nothing is stored.
    pub fn load_persisted(&self) -> Result<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let _guard = self.update_guard.lock();
        self.load_locked(persistence)
    }

    /// Restores the current context's snapshot. Must be called with the
    /// update guard held, so the recorded hash matches the restored flags.
    fn load_locked(&self, persistence: &Persistence) -> Result<bool> {
        let name = persistence.name();
        let Some(text) = persistence.backend.load(&name)? else {
            debug!(%name, "no persisted flag snapshot");
            return Ok(false);
        };
        let changes = self.restore_locked(&text)?;
        *persistence.last_hash.lock() = Some(snapshot::digest(&self.save()?));
        info!(%name, flags = self.store.len(), "restored persisted flag snapshot");
        self.listeners.dispatch(&changes);
        Ok(true)
    }

    /// Metadata of the current context's persisted snapshot.
    pub fn persisted_meta(&self) -> Result<Option<SnapshotMeta>> {
        match &self.persistence {
            Some(persistence) => persistence.backend.meta(&persistence.name()),
            None => Ok(None),
        }
    }

    /// Names of every snapshot held by the persistence backend.
    pub fn persisted_names(&self) -> Result<Vec<String>> {
        match &self.persistence {
            Some(persistence) => persistence.backend.names(),
            None => Ok(Vec::new()),
        }
    }

    /// Deletes the current context's persisted snapshot. The in-memory flags
    /// are kept.
    pub fn remove_persisted(&self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.backend.remove(&persistence.name())?;
            *persistence.last_hash.lock() = None;
        }
        Ok(())
    }

    /// Switches to another context. The store is replaced by the new
    /// context's persisted snapshot, and listeners see the differences. When
    /// there is no snapshot, or it cannot be read, the store is emptied
    /// without notification.
    pub fn identify(&self, context_key: &str) -> Result<bool> {
        let _guard = self.update_guard.lock();
        let Some(persistence) = &self.persistence else {
            self.store.reset();
            return Ok(false);
        };
        *persistence.context_key.lock() = context_key.to_string();
        *persistence.last_hash.lock() = None;
        match self.load_locked(persistence) {
            Ok(true) => Ok(true),
            other => {
                self.store.reset();
                other
            }
        }
    }
}

impl Default for FlagCache {
    fn default() -> Self {
        Self::new()
    }
}
