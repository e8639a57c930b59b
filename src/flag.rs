use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Locally known state of one feature flag.
///
/// A flag with `deleted == true` is a tombstone: readers never see it, but the
/// store keeps it so that an older update for the same key cannot resurrect
/// the flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub key: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_version: Option<u64>,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_reason: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Flag {
    pub fn new(key: impl Into<String>, version: u64, value: Value) -> Self {
        Self {
            key: key.into(),
            version,
            flag_version: None,
            value,
            variation: None,
            reason: None,
            track_events: false,
            track_reason: false,
            debug_events_until_date: None,
            deleted: false,
        }
    }

    /// A deletion marker for `key` at `version`.
    pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
        Self {
            deleted: true,
            ..Self::new(key, version, Value::Null)
        }
    }

    pub fn with_variation(mut self, variation: i64) -> Self {
        self.variation = Some(variation);
        self
    }

    pub fn with_reason(mut self, reason: Value) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_tracking(mut self, track_events: bool, track_reason: bool) -> Self {
        self.track_events = track_events;
        self.track_reason = track_reason;
        self
    }

    /// Checks the structural rules every stored flag must satisfy.
    /// Returns a human readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("flag key is empty".to_string());
        }
        if let Some(variation) = self.variation {
            if variation < 0 {
                return Err(format!("negative variation index {}", variation));
            }
        }
        if let Some(reason) = &self.reason {
            if !reason.is_object() {
                return Err("reason is not an object".to_string());
            }
        }
        Ok(())
    }
}

/// One entry of an update batch as delivered by the sync layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    pub key: String,
    pub version: u64,
    #[serde(default)]
    pub flag_version: Option<u64>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub variation: Option<i64>,
    #[serde(default)]
    pub reason: Option<Value>,
    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_reason: bool,
    #[serde(default)]
    pub debug_events_until_date: Option<i64>,
    #[serde(default, alias = "isDeleted")]
    pub deleted: bool,
}

impl FlagUpdate {
    pub fn upsert(key: impl Into<String>, version: u64, value: Value) -> Self {
        Flag::new(key, version, value).into()
    }

    pub fn delete(key: impl Into<String>, version: u64) -> Self {
        Flag::tombstone(key, version).into()
    }
}

impl From<Flag> for FlagUpdate {
    fn from(flag: Flag) -> Self {
        Self {
            key: flag.key,
            version: flag.version,
            flag_version: flag.flag_version,
            value: flag.value,
            variation: flag.variation,
            reason: flag.reason,
            track_events: flag.track_events,
            track_reason: flag.track_reason,
            debug_events_until_date: flag.debug_events_until_date,
            deleted: flag.deleted,
        }
    }
}

impl From<FlagUpdate> for Flag {
    fn from(update: FlagUpdate) -> Self {
        Self {
            key: update.key,
            version: update.version,
            flag_version: update.flag_version,
            // a tombstone carries no value
            value: if update.deleted {
                Value::Null
            } else {
                update.value
            },
            variation: update.variation,
            reason: update.reason,
            track_events: update.track_events,
            track_reason: update.track_reason,
            debug_events_until_date: update.debug_events_until_date,
            deleted: update.deleted,
        }
    }
}

/// What happened to a key when an update was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Unchanged => write!(f, "unchanged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub key: String,
    pub kind: ChangeKind,
}

/// Ordered outcome of applying a batch, one entry per accepted update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Vec<FlagChange>,
    /// Malformed entries that were dropped from the batch.
    pub skipped: usize,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> crate::Result<Self> {
        let mut changes = Vec::new();
        changes.try_reserve_exact(capacity)?;
        Ok(Self { changes, skipped: 0 })
    }

    pub fn push(&mut self, key: impl Into<String>, kind: ChangeKind) {
        self.changes.push(FlagChange {
            key: key.into(),
            kind,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlagChange> {
        self.changes.iter()
    }

    /// Entries whose kind is not `Unchanged`.
    pub fn changed(&self) -> impl Iterator<Item = &FlagChange> {
        self.changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Unchanged)
    }

    pub fn has_changes(&self) -> bool {
        self.changed().next().is_some()
    }

    /// Kind recorded for the last entry touching `key`.
    pub fn kind_of(&self, key: &str) -> Option<ChangeKind> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.key == key)
            .map(|c| c.kind)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a FlagChange;
    type IntoIter = std::slice::Iter<'a, FlagChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
