//! Persisted text form of the flag store.
//!
//! A snapshot is a JSON object mapping each live flag key to
//! `{version, value, variation?, reason?, trackEvents, trackReason}` plus the
//! optional `flagVersion` and `debugEventsUntilDate`. Deleted flags are never
//! written. Unknown fields are ignored on restore.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::error::{FlagCacheError, Result};
use crate::flag::{ChangeSet, Flag};
use crate::store::FlagStore;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntry {
    version: u64,
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<Value>,
    #[serde(default)]
    track_events: bool,
    #[serde(default)]
    track_reason: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flag_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    debug_events_until_date: Option<i64>,
}

impl From<Flag> for SnapshotEntry {
    fn from(flag: Flag) -> Self {
        Self {
            version: flag.version,
            value: flag.value,
            variation: flag.variation,
            reason: flag.reason,
            track_events: flag.track_events,
            track_reason: flag.track_reason,
            flag_version: flag.flag_version,
            debug_events_until_date: flag.debug_events_until_date,
        }
    }
}

impl SnapshotEntry {
    fn into_flag(self, key: String) -> Flag {
        Flag {
            key,
            version: self.version,
            flag_version: self.flag_version,
            value: self.value,
            variation: self.variation,
            reason: self.reason,
            track_events: self.track_events,
            track_reason: self.track_reason,
            debug_events_until_date: self.debug_events_until_date,
            deleted: false,
        }
    }
}

/// Serializes every live flag in `store`. Keys are written in sorted order, so
/// equal stores produce identical text.
pub fn save(store: &FlagStore) -> Result<String> {
    save_flags(store.get_all())
}

/// Serializes `flags`, skipping tombstones.
pub fn save_flags(flags: Vec<Flag>) -> Result<String> {
    let entries: BTreeMap<String, SnapshotEntry> = flags
        .into_iter()
        .filter(|flag| !flag.deleted)
        .map(|flag| (flag.key.clone(), SnapshotEntry::from(flag)))
        .collect();
    Ok(serde_json::to_string(&entries)?)
}

/// Parses snapshot text into flags, ordered by key.
pub fn restore(text: &str) -> Result<Vec<Flag>> {
    let entries: BTreeMap<String, SnapshotEntry> = serde_json::from_str(text)?;
    entries
        .into_iter()
        .map(|(key, entry)| {
            let flag = entry.into_flag(key);
            flag.validate().map_err(|reason| {
                FlagCacheError::InvalidSnapshot(format!("flag '{}': {}", flag.key, reason))
            })?;
            Ok(flag)
        })
        .collect()
}

/// Parses `text` and replaces the content of `store` with it. The store is
/// left untouched if the text is not a valid snapshot.
pub fn restore_into(store: &FlagStore, text: &str) -> Result<ChangeSet> {
    let flags = restore(text)?;
    store.replace_all(flags)
}

/// Lower-case hex SHA-1 of a snapshot text.
pub fn digest(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata stored next to a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub hash: String,
    pub saved_at: String,
    pub flags_count: u64,
}

impl SnapshotMeta {
    pub fn for_snapshot(text: &str, flags_count: usize) -> Self {
        Self {
            hash: digest(text),
            saved_at: chrono::Utc::now().to_rfc3339(),
            flags_count: flags_count as u64,
        }
    }
}
