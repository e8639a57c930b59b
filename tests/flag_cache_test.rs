use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use flagcache_lib::{ChangeKind, Flag, FlagCache, FlagStore, FlagUpdate, SharedListener};
use proptest::prelude::*;
use serde_json::json;

fn counter() -> (Arc<AtomicUsize>, SharedListener) {
    let count = Arc::new(AtomicUsize::new(0));
    let listener: SharedListener = {
        let count = Arc::clone(&count);
        Arc::new(move |_: &str, _: ChangeKind| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    (count, listener)
}

#[test]
fn test_scenario_add_then_stale_then_delete() {
    let cache = FlagCache::new();
    let (count, listener) = counter();
    assert!(cache.register_listener("f1", &listener));

    let changes = cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 1, json!(true))])
        .unwrap();
    assert_eq!(changes.kind_of("f1"), Some(ChangeKind::Added));
    let flag = cache.flag("f1").unwrap();
    assert_eq!((flag.version, flag.value), (1, json!(true)));

    let changes = cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 1, json!(false))])
        .unwrap();
    assert_eq!(changes.kind_of("f1"), Some(ChangeKind::Unchanged));
    assert_eq!(cache.flag("f1").unwrap().value, json!(true));

    let changes = cache
        .apply_batch(vec![FlagUpdate::delete("f1", 2)])
        .unwrap();
    assert_eq!(changes.kind_of("f1"), Some(ChangeKind::Deleted));
    assert!(cache.flag("f1").is_none());

    // added + deleted; the stale update is not dispatched
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_double_registration_notifies_once() {
    let cache = FlagCache::new();
    let (count, listener) = counter();
    assert!(cache.register_listener("f1", &listener));
    assert!(cache.register_listener("f1", &listener));

    cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 1, json!(1))])
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unregister_stops_notifications() {
    let cache = FlagCache::new();
    let (count, listener) = counter();
    cache.register_listener("f1", &listener);
    cache.unregister_listener("f1", &listener);

    cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 1, json!(1))])
        .unwrap();
    cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 2, json!(2))])
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_listener_may_register_from_callback() {
    let cache = Arc::new(FlagCache::new());
    let (late_count, late) = counter();
    let registering: SharedListener = {
        let cache = Arc::clone(&cache);
        Arc::new(move |key: &str, _: ChangeKind| {
            cache.register_listener(key, &late);
        })
    };
    cache.register_listener("f1", &registering);

    cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 1, json!(1))])
        .unwrap();
    assert_eq!(late_count.load(Ordering::SeqCst), 0);
    cache
        .apply_batch(vec![FlagUpdate::upsert("f1", 2, json!(2))])
        .unwrap();
    assert_eq!(late_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_corrupted_restore_keeps_snapshot() {
    let cache = FlagCache::new();
    cache
        .apply_batch(vec![
            FlagUpdate::upsert("a", 3, json!({"x": 1})),
            FlagUpdate::upsert("b", 1, json!("b")),
        ])
        .unwrap();
    let before = cache.save().unwrap();

    for corrupted in ["", "null", "{\"a\":", "{\"a\":{\"version\":-1,\"value\":1}}"] {
        assert!(cache.restore(corrupted).is_err(), "accepted {:?}", corrupted);
    }
    assert_eq!(cache.save().unwrap(), before);
}

#[test]
fn test_concurrent_writers_and_readers() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const ROUNDS: u64 = 200;

    let store = FlagStore::new();
    let committed: Vec<AtomicU64> = (0..WRITERS).map(|_| AtomicU64::new(0)).collect();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for w in 0..WRITERS {
            let store = &store;
            let committed = &committed;
            s.spawn(move || {
                let key = format!("writer-{}", w);
                for version in 1..=ROUNDS {
                    store
                        .apply_batch([FlagUpdate::upsert(key.clone(), version, json!(version))])
                        .unwrap();
                    committed[w].store(version, Ordering::SeqCst);
                }
            });
        }

        let mut readers = Vec::new();
        for _ in 0..READERS {
            let store = &store;
            let committed = &committed;
            let done = &done;
            readers.push(s.spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let floor: Vec<u64> = committed
                        .iter()
                        .map(|c| c.load(Ordering::SeqCst))
                        .collect();
                    let seen: BTreeMap<String, u64> = store
                        .get_all()
                        .into_iter()
                        .map(|f| (f.key, f.version))
                        .collect();
                    for (w, min) in floor.iter().enumerate() {
                        if *min == 0 {
                            continue;
                        }
                        let version = seen.get(&format!("writer-{}", w)).copied().unwrap_or(0);
                        assert!(version >= *min, "writer-{} at {} < {}", w, version, min);
                    }
                }
            }));
        }

        while committed
            .iter()
            .any(|c| c.load(Ordering::SeqCst) < ROUNDS)
        {
            thread::yield_now();
        }
        done.store(true, Ordering::SeqCst);
        for reader in readers {
            reader.join().unwrap();
        }
    });

    assert_eq!(store.len(), WRITERS);
    assert_eq!(store.generation(), WRITERS as u64 * ROUNDS);
}

#[test]
fn test_readers_see_whole_batches() {
    const WRITERS: usize = 3;
    const ROUNDS: u64 = 200;
    const KEYS: [&str; 3] = ["a", "b", "c"];

    let store = FlagStore::new();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let mut writers = Vec::new();
        for w in 0..WRITERS {
            let store = &store;
            writers.push(s.spawn(move || {
                for version in 1..=ROUNDS {
                    let batch: Vec<FlagUpdate> = KEYS
                        .iter()
                        .map(|k| {
                            FlagUpdate::upsert(format!("{}-{}", w, k), version, json!(version))
                        })
                        .collect();
                    store.apply_batch(batch).unwrap();
                }
            }));
        }

        for _ in 0..2 {
            let store = &store;
            let done = &done;
            s.spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let seen: BTreeMap<String, u64> = store
                        .get_all()
                        .into_iter()
                        .map(|f| (f.key, f.version))
                        .collect();
                    for w in 0..WRITERS {
                        let versions: Vec<Option<u64>> = KEYS
                            .iter()
                            .map(|k| seen.get(&format!("{}-{}", w, k)).copied())
                            .collect();
                        assert!(
                            versions.iter().all(|v| *v == versions[0]),
                            "writer {} partially visible: {:?}",
                            w,
                            versions
                        );
                    }
                }
            });
        }

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(store.len(), WRITERS * KEYS.len());
    assert!(store.get_all().iter().all(|f| f.version == ROUNDS));
}

type Entry = ((u8, u64), (i32, bool));

fn update_of(&((key, version), (value, deleted)): &Entry) -> FlagUpdate {
    let key = format!("flag-{}", key);
    if deleted {
        FlagUpdate::delete(key, version)
    } else {
        FlagUpdate::upsert(key, version, json!(value))
    }
}

fn entries() -> impl Strategy<Value = (Vec<Entry>, Vec<bool>)> {
    prop::collection::btree_map((0u8..6, 1u64..40), (any::<i32>(), any::<bool>()), 0..40)
        .prop_map(|m| m.into_iter().collect::<Vec<Entry>>())
        .prop_flat_map(|v| {
            let len = v.len();
            (Just(v).prop_shuffle(), prop::collection::vec(any::<bool>(), len))
        })
}

proptest! {
    #[test]
    fn prop_highest_version_wins_regardless_of_order((all, split) in entries()) {
        let (first, second): (Vec<_>, Vec<_>) = all
            .iter()
            .zip(split.iter())
            .partition(|(_, in_first)| **in_first);

        let store = FlagStore::new();
        store.apply_batch(first.iter().map(|(e, _)| update_of(e))).unwrap();
        store.apply_batch(second.iter().map(|(e, _)| update_of(e))).unwrap();

        let mut newest: BTreeMap<u8, &Entry> = BTreeMap::new();
        for entry in &all {
            let key = entry.0 .0;
            match newest.get(&key) {
                Some(current) if current.0 .1 >= entry.0 .1 => {}
                _ => {
                    newest.insert(key, entry);
                }
            }
        }
        let expected: Vec<Flag> = newest
            .values()
            .map(|e| Flag::from(update_of(e)))
            .filter(|f| !f.deleted)
            .collect();

        prop_assert_eq!(store.get_all(), expected);
    }

    #[test]
    fn prop_stale_update_never_changes_flag(
        version in 1u64..1000,
        lag in 0u64..1000,
        stored in any::<i64>(),
        incoming in any::<i64>(),
        tombstone in any::<bool>(),
    ) {
        let store = FlagStore::new();
        store.apply_batch([FlagUpdate::upsert("f", version, json!(stored))]).unwrap();
        let before = store.get("f");

        let stale_version = version.saturating_sub(lag);
        let update = if tombstone {
            FlagUpdate::delete("f", stale_version)
        } else {
            FlagUpdate::upsert("f", stale_version, json!(incoming))
        };
        let changes = store.apply_batch([update]).unwrap();

        prop_assert_eq!(store.get("f"), before);
        prop_assert_eq!(changes.kind_of("f"), Some(ChangeKind::Unchanged));
    }

    #[test]
    fn prop_save_restore_round_trip((all, _) in entries()) {
        let store = FlagStore::new();
        store.apply_batch(all.iter().map(update_of)).unwrap();

        let text = flagcache_lib::snapshot::save(&store).unwrap();
        let restored = FlagStore::new();
        flagcache_lib::snapshot::restore_into(&restored, &text).unwrap();

        prop_assert_eq!(restored.get_all(), store.get_all());
    }
}
