//! Integration test: arena generations, recycling and growth.
//!
//! Covers what happens across release/reset cycles (stale handles, a
//! steady memory footprint, poisoned memory in debug mode) and property
//! tests for the allocator's layout and the growable array API.

use linac_arena::{ArenaError, Ptr, Slice, WORD};
use linac_test_utils::fixtures::Node;
use linac_test_utils::{debug_pool, small_pool};
use proptest::prelude::*;

#[test]
fn every_handle_kind_goes_stale_after_release() {
    let pool = small_pool();
    let lac = pool.get();
    let p = lac.new(1_u64);
    let s = lac.copy_slice(&[1_u8, 2, 3]);
    let text = lac.new_str("gone");
    let map = lac.new_map::<u8, u8>(1);
    lac.release();

    let lac = pool.get();
    let stale = ArenaError::StaleHandle {
        handle_epoch: 0,
        current_epoch: 1,
    };
    assert_eq!(lac.get(p).unwrap_err(), stale);
    assert_eq!(lac.slice(&s).unwrap_err(), stale);
    assert_eq!(lac.str(text).unwrap_err(), stale);
    assert_eq!(lac.map(map).unwrap_err(), stale);
    assert_eq!(lac.extend(s, &[4]).unwrap_err(), stale);
}

#[test]
fn footprint_is_stable_across_cycles() {
    let pool = small_pool();
    let mut footprints = Vec::new();
    let mut created = Vec::new();
    for cycle in 0..5_i64 {
        let lac = pool.get();
        let mut head = None;
        for i in 0..200 {
            head = Some(lac.new(Node {
                value: cycle * 1000 + i,
                next: head,
            }));
        }
        let mut tags = Slice::empty();
        for i in 0..64_u32 {
            tags = lac.append(tags, i).unwrap();
        }
        let stats = lac.stats();
        footprints.push((stats.chunks, stats.bytes_used, stats.bytes_reserved));
        lac.release();
        created.push(pool.stats().chunks_created);
    }

    assert!(footprints.windows(2).all(|w| w[0] == w[1]), "{footprints:?}");
    assert!(footprints[0].0 > 1);
    assert!(created.iter().all(|&c| c == created[0]), "{created:?}");
    let stats = pool.stats();
    assert_eq!(stats.arenas_created, 1);
    assert_eq!(stats.chunks_idle, created[0]);
}

#[test]
fn released_memory_is_poisoned_in_debug() {
    let pool = debug_pool();
    let poison = pool.config().poison_byte;

    let lac = pool.get();
    let first = lac.alloc(64, true);
    lac.release();

    let lac = pool.get();
    let again = lac.alloc(64, false);
    assert_eq!(again, first);
    // SAFETY: the 64 bytes were written by the poisoning reset and are
    // reserved for this handle.
    let bytes = unsafe { std::slice::from_raw_parts(again.as_ptr(), 64) };
    assert!(bytes.iter().all(|&b| b == poison));

    let zeroed = lac.alloc(64, true);
    // SAFETY: freshly reserved and zeroed.
    let bytes = unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), 64) };
    assert!(bytes.iter().all(|&b| b == 0));
    lac.release();
}

#[test]
fn disabled_pool_recovers_after_reset() {
    let pool = small_pool();
    pool.set_disabled(true);
    let lac = pool.get();
    assert!(lac.is_disabled());
    let p = lac.new(3_u16);
    assert_eq!(lac.stats().native_allocations, 1);
    assert_eq!(*lac.get(p).unwrap(), 3);
    lac.release();

    pool.set_disabled(false);
    let lac = pool.get();
    assert!(!lac.is_disabled());
    let _ = lac.new(4_u16);
    assert_eq!(lac.stats().native_allocations, 0);
    assert_eq!(lac.stats().chunks, 1);
}

proptest! {
    #[test]
    fn raw_allocations_are_aligned_and_disjoint(
        sizes in prop::collection::vec(0usize..600, 1..64),
    ) {
        let pool = small_pool();
        let lac = pool.get();
        let mut ranges = Vec::with_capacity(sizes.len());
        for &size in &sizes {
            let ptr = lac.alloc(size, false);
            let addr = ptr.as_ptr() as usize;
            prop_assert_eq!(addr % WORD, 0);
            let span = size.div_ceil(WORD).max(1) * WORD;
            ranges.push((addr, addr + span));
        }
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn append_matches_extend(
        values in prop::collection::vec(any::<i64>(), 0..100),
        split in 0usize..100,
    ) {
        let pool = small_pool();
        let lac = pool.get();

        let mut one_by_one = Slice::empty();
        for &v in &values {
            one_by_one = lac.append(one_by_one, v).unwrap();
        }

        let split = split.min(values.len());
        let mut batched = lac.copy_slice(&values[..split]);
        batched = lac.extend(batched, &values[split..]).unwrap();

        prop_assert_eq!(lac.slice(&one_by_one).unwrap(), &values[..]);
        prop_assert_eq!(lac.slice(&batched).unwrap(), &values[..]);
        prop_assert!(one_by_one.cap() >= one_by_one.len());
    }

    #[test]
    fn pointer_arrays_survive_growth(
        values in prop::collection::vec(any::<i64>(), 1..50),
    ) {
        let pool = small_pool();
        let lac = pool.get();
        let ptrs: Vec<Ptr<i64>> = values.iter().map(|&v| lac.new(v)).collect();

        let mut grown = Slice::empty();
        for &p in &ptrs {
            grown = lac.append(grown, p).unwrap();
        }
        let extended = lac.extend(Slice::empty(), &ptrs).unwrap();

        prop_assert_eq!(lac.slice(&grown).unwrap(), lac.slice(&extended).unwrap());
        for (p, v) in lac.slice(&grown).unwrap().iter().zip(&values) {
            prop_assert_eq!(lac.get(*p).unwrap(), v);
        }
    }
}
