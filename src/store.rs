use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{FlagCacheError, Result};
use crate::flag::{ChangeKind, ChangeSet, Flag, FlagUpdate};

/// Immutable view of the store published after every mutation.
#[derive(Debug, Default)]
struct StoreState {
    flags: BTreeMap<String, Flag>,
    generation: u64,
    initialized: bool,
}

/// Concurrent key to [`Flag`] map.
///
/// Readers load the current [`StoreState`] without taking a lock and copy out
/// what they need. Writers serialize on `writer`, build a new state from the
/// current one and publish it in a single swap, so a reader sees either the
/// whole of a batch or none of it.
pub struct FlagStore {
    current: ArcSwap<StoreState>,
    writer: Mutex<()>,
}

impl FlagStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(StoreState::default()),
            writer: Mutex::new(()),
        }
    }

    /// Applies a batch of updates, newest version wins.
    ///
    /// Malformed entries are skipped and counted in [`ChangeSet::skipped`];
    /// stale entries (version not greater than the stored one) are reported as
    /// [`ChangeKind::Unchanged`] and leave the stored flag alone.
    pub fn apply_batch<I>(&self, updates: I) -> Result<ChangeSet>
    where
        I: IntoIterator<Item = FlagUpdate>,
    {
        let updates = updates.into_iter();
        let mut changes = ChangeSet::with_capacity(updates.size_hint().0)?;

        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let mut flags = current.flags.clone();

        for update in updates {
            let flag = Flag::from(update);
            if let Err(reason) = flag.validate() {
                warn!(key = %flag.key, %reason, "skipping malformed flag update");
                changes.skipped += 1;
                continue;
            }
            let key = flag.key.clone();
            let kind = upsert(&mut flags, flag);
            changes.push(key, kind);
        }

        let generation = current.generation + 1;
        self.current.store(Arc::new(StoreState {
            flags,
            generation,
            initialized: current.initialized,
        }));

        debug!(
            generation,
            entries = changes.len(),
            skipped = changes.skipped,
            "applied flag batch"
        );
        Ok(changes)
    }

    /// Returns a copy of the flag for `key`, or `None` if it is unknown or
    /// deleted.
    pub fn get(&self, key: &str) -> Option<Flag> {
        self.current
            .load()
            .flags
            .get(key)
            .filter(|flag| !flag.deleted)
            .cloned()
    }

    /// Copies of every live flag, ordered by key.
    pub fn get_all(&self) -> Vec<Flag> {
        self.current
            .load()
            .flags
            .values()
            .filter(|flag| !flag.deleted)
            .cloned()
            .collect()
    }

    /// Values of every live flag keyed by flag key.
    pub fn all_values(&self) -> BTreeMap<String, Value> {
        self.current
            .load()
            .flags
            .values()
            .filter(|flag| !flag.deleted)
            .map(|flag| (flag.key.clone(), flag.value.clone()))
            .collect()
    }

    /// Replaces the whole content of the store, discarding tombstones and
    /// version history.
    ///
    /// Fails without touching the store if any flag is malformed or a key
    /// appears twice. The returned change set compares the previous live
    /// flags with the new ones.
    pub fn replace_all(&self, flags: Vec<Flag>) -> Result<ChangeSet> {
        let mut replacement = BTreeMap::new();
        for flag in flags {
            flag.validate()
                .map_err(|reason| FlagCacheError::InvalidFlag {
                    key: flag.key.clone(),
                    reason,
                })?;
            if flag.deleted {
                continue;
            }
            if replacement.contains_key(&flag.key) {
                return Err(FlagCacheError::InvalidFlag {
                    key: flag.key,
                    reason: "duplicate key".to_string(),
                });
            }
            replacement.insert(flag.key.clone(), flag);
        }

        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let changes = diff(&current.flags, &replacement)?;

        let generation = current.generation + 1;
        self.current.store(Arc::new(StoreState {
            flags: replacement,
            generation,
            initialized: true,
        }));

        debug!(generation, flags = changes.len(), "replaced flag store");
        Ok(changes)
    }

    /// Drops every flag and tombstone.
    pub fn reset(&self) {
        let _guard = self.writer.lock();
        let generation = self.current.load().generation + 1;
        self.current.store(Arc::new(StoreState {
            flags: BTreeMap::new(),
            generation,
            initialized: false,
        }));
        debug!(generation, "reset flag store");
    }

    /// Number of mutations published so far.
    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Whether the store has received full state since creation or the last
    /// reset.
    pub fn is_initialized(&self) -> bool {
        self.current.load().initialized
    }

    /// Number of live flags.
    pub fn len(&self) -> usize {
        self.current
            .load()
            .flags
            .values()
            .filter(|flag| !flag.deleted)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FlagStore {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert(flags: &mut BTreeMap<String, Flag>, flag: Flag) -> ChangeKind {
    let previous = flags.get(&flag.key).map(|f| (f.version, f.deleted));
    let kind = match previous {
        None if flag.deleted => ChangeKind::Unchanged,
        None => ChangeKind::Added,
        Some((version, _)) if flag.version <= version => return ChangeKind::Unchanged,
        Some((_, was_deleted)) => match (was_deleted, flag.deleted) {
            (false, false) => ChangeKind::Updated,
            (false, true) => ChangeKind::Deleted,
            (true, false) => ChangeKind::Added,
            (true, true) => ChangeKind::Unchanged,
        },
    };
    flags.insert(flag.key.clone(), flag);
    kind
}

fn diff(old: &BTreeMap<String, Flag>, new: &BTreeMap<String, Flag>) -> Result<ChangeSet> {
    let mut changes = ChangeSet::with_capacity(old.len().max(new.len()))?;
    let mut seen = HashSet::new();

    for (key, flag) in new {
        let kind = match old.get(key).filter(|f| !f.deleted) {
            None => ChangeKind::Added,
            Some(previous) if previous == flag => ChangeKind::Unchanged,
            Some(_) => ChangeKind::Updated,
        };
        seen.insert(key.as_str());
        changes.push(key.as_str(), kind);
    }
    for (key, flag) in old {
        if !flag.deleted && !seen.contains(key.as_str()) {
            changes.push(key.as_str(), ChangeKind::Deleted);
        }
    }
    Ok(changes)
}
