//! Per-flag change listeners.
//!
//! Registrations are keyed by `(flag key, listener identity)`, ordered first by
//! flag key and then by [`ListenerId`], which is the address of the shared
//! listener allocation. The registry holds its own `Arc` to every registered
//! listener, so an address cannot be handed out to another listener while the
//! registration exists.
//!
//! Dispatch copies the candidate listeners out of the registry and releases the
//! registry lock before any callback runs. Callbacks may therefore register or
//! unregister listeners, including themselves. Callbacks invoked through
//! [`FlagCache`](crate::FlagCache) run while the cache's update guard is held
//! and must not apply updates to the same cache: that lock is not reentrant and
//! the call deadlocks.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::flag::{ChangeKind, ChangeSet};

/// Observer of changes to one flag key.
///
/// Implemented for every `Fn(&str, ChangeKind) + Send + Sync`. Any context the
/// observer needs lives in the listener value itself.
pub trait FlagListener: Send + Sync {
    fn on_flag_change(&self, key: &str, kind: ChangeKind);
}

impl<F> FlagListener for F
where
    F: Fn(&str, ChangeKind) + Send + Sync,
{
    fn on_flag_change(&self, key: &str, kind: ChangeKind) {
        self(key, kind)
    }
}

pub type SharedListener = Arc<dyn FlagListener>;

/// Identity of a shared listener: the address of its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    pub fn of(listener: &SharedListener) -> Self {
        ListenerId(Arc::as_ptr(listener) as *const () as usize)
    }
}

struct Registration {
    listener: SharedListener,
    /// Registration order, used to dispatch newest first.
    seq: u64,
}

#[derive(Default)]
struct Registrations {
    by_flag: BTreeMap<String, BTreeMap<ListenerId, Registration>>,
    next_seq: u64,
}

/// Deduplicated set of `(flag key, listener)` registrations.
///
/// Listeners for one key are invoked most recently registered first.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Registrations>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `flag_key`.
    ///
    /// Registering a pair that is already present succeeds without changing
    /// anything. Fails with [`OutOfMemory`](crate::FlagCacheError::OutOfMemory)
    /// if the key cannot be copied, leaving the registry unchanged.
    pub fn add(&self, flag_key: &str, listener: &SharedListener) -> Result<()> {
        let id = ListenerId::of(listener);
        let mut inner = self.inner.lock();

        if inner
            .by_flag
            .get(flag_key)
            .is_some_and(|listeners| listeners.contains_key(&id))
        {
            return Ok(());
        }

        let mut key = String::new();
        key.try_reserve_exact(flag_key.len())?;
        key.push_str(flag_key);

        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.by_flag.entry(key).or_default().insert(
            id,
            Registration {
                listener: Arc::clone(listener),
                seq,
            },
        );
        Ok(())
    }

    /// Removes the registration of `listener` for `flag_key`, if any.
    pub fn remove(&self, flag_key: &str, listener: &SharedListener) {
        let id = ListenerId::of(listener);
        let mut inner = self.inner.lock();
        if let Some(listeners) = inner.by_flag.get_mut(flag_key) {
            listeners.remove(&id);
            if listeners.is_empty() {
                inner.by_flag.remove(flag_key);
            }
        }
    }

    /// Notifies the listeners of every changed key in `changes`.
    ///
    /// `Unchanged` entries are not dispatched. Returns the number of callback
    /// invocations.
    pub fn dispatch(&self, changes: &ChangeSet) -> usize {
        let pending: Vec<(&str, ChangeKind, Vec<SharedListener>)> = {
            let inner = self.inner.lock();
            changes
                .changed()
                .filter_map(|change| {
                    let listeners = inner.by_flag.get(change.key.as_str())?;
                    let mut ordered: Vec<&Registration> = listeners.values().collect();
                    ordered.sort_by(|a, b| b.seq.cmp(&a.seq));
                    Some((
                        change.key.as_str(),
                        change.kind,
                        ordered.into_iter().map(|r| Arc::clone(&r.listener)).collect(),
                    ))
                })
                .collect()
        };

        let mut invoked = 0;
        for (key, kind, listeners) in pending {
            for listener in listeners {
                trace!(key, %kind, "notifying flag listener");
                listener.on_flag_change(key, kind);
                invoked += 1;
            }
        }
        invoked
    }

    /// Number of listeners registered for `flag_key`.
    pub fn listener_count(&self, flag_key: &str) -> usize {
        self.inner
            .lock()
            .by_flag
            .get(flag_key)
            .map_or(0, |listeners| listeners.len())
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .by_flag
            .values()
            .map(|listeners| listeners.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_flag.is_empty()
    }
}
