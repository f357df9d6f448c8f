//! Integration test: allocation from many threads at once.
//!
//! Several threads share one arena through `inc_ref` handles and bump
//! concurrently. Every allocation must be distinct and fully written, the
//! share count must settle back to one when the helpers finish, and chunks
//! built by threads that lose an install race must end up back in the pool.

use std::sync::Barrier;
use std::thread;

use linac_arena::{ArenaPool, ChunkPool, LacConfig, Slice};
use linac_test_utils::{small_pool, SMALL_CHUNK};

const THREADS: u64 = 8;
const PER_THREAD: usize = 2000;

#[test]
fn shared_arena_hands_out_disjoint_ranges() {
    let pool = small_pool();
    let lac = pool.get();
    let (tx, rx) = crossbeam_channel::unbounded::<(u64, Slice<u64>)>();

    let workers: Vec<_> = (0..THREADS)
        .map(|tag| {
            let handle = lac.inc_ref();
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let values = vec![tag; 1 + i % 4];
                    let slice = handle.copy_slice(&values);
                    tx.send((tag, slice)).unwrap();
                }
                handle.dec_ref();
            })
        })
        .collect();
    drop(tx);
    assert_eq!(lac.share_count(), 1 + THREADS as i32);

    let mut results = Vec::with_capacity(THREADS as usize * PER_THREAD);
    for (tag, slice) in rx.iter() {
        results.push((tag, slice));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(results.len(), THREADS as usize * PER_THREAD);
    assert_eq!(lac.share_count(), 1);

    let mut ranges = Vec::with_capacity(results.len());
    for (tag, slice) in &results {
        let values = lac.slice(slice).unwrap();
        assert!(values.iter().all(|v| v == tag), "thread {tag} data was overwritten");
        ranges.push((slice.addr(), slice.addr() + slice.len() * 8));
    }
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "ranges {:#x}..{:#x} and {:#x}..{:#x} overlap",
            pair[0].0,
            pair[0].1,
            pair[1].0,
            pair[1].1
        );
    }
    assert!(lac.stats().chunks > 1);
}

#[test]
fn reserved_chunks_are_handed_out_once() {
    const TAKERS: usize = 1000;

    let chunks = ChunkPool::new(SMALL_CHUNK, TAKERS);
    assert_eq!(chunks.reserve(TAKERS), TAKERS);

    let (tx, rx) = crossbeam_channel::unbounded();
    let start = Barrier::new(TAKERS);
    thread::scope(|s| {
        for _ in 0..TAKERS {
            let (chunks, start, tx) = (&chunks, &start, tx.clone());
            s.spawn(move || {
                start.wait();
                tx.send(chunks.get(64)).unwrap();
            });
        }
    });
    drop(tx);

    // Hold every chunk until the addresses are compared.
    let held: Vec<_> = rx.iter().collect();
    assert_eq!(held.len(), TAKERS);
    let mut bases: Vec<usize> = held.iter().map(|c| c.base_addr()).collect();
    bases.sort_unstable();
    bases.dedup();
    assert_eq!(bases.len(), TAKERS);
    assert_eq!(chunks.created(), TAKERS);
    assert_eq!(chunks.idle(), 0);
}

#[test]
fn racing_chunk_installs_return_losers_to_the_pool() {
    const RACERS: usize = 16;
    const ALLOCS: usize = 2000;
    // Ten 24-byte requests fill a chunk, so installs collide constantly.
    const TINY_CHUNK: usize = 256;

    let pool = ArenaPool::new(LacConfig::new().with_chunk_size(TINY_CHUNK)).unwrap();
    let lac = pool.get();
    let start = Barrier::new(RACERS);
    thread::scope(|s| {
        for _ in 0..RACERS {
            let (handle, start) = (lac.inc_ref(), &start);
            s.spawn(move || {
                start.wait();
                for _ in 0..ALLOCS {
                    let _ = handle.alloc(24, false);
                }
                handle.dec_ref();
            });
        }
    });
    assert_eq!(lac.share_count(), 1);

    let in_use = lac.stats().chunks;
    let stats = pool.stats();
    assert!(in_use >= RACERS * ALLOCS * 24 / TINY_CHUNK);
    assert!(stats.chunks_created <= in_use + RACERS, "{stats}; {in_use} in use");
    assert!(stats.chunks_idle <= RACERS, "{stats}");
    assert_eq!(stats.chunks_created, in_use + stats.chunks_idle, "{stats}");
    assert_eq!(stats.standalone_chunks, 0);

    lac.release();
    assert_eq!(pool.stats().chunks_idle, pool.stats().chunks_created);
}

#[test]
fn concurrent_get_and_release_reuses_arenas() {
    const WORKERS: usize = 8;

    let pool = small_pool();
    thread::scope(|s| {
        for w in 0..WORKERS {
            let pool = &pool;
            s.spawn(move || {
                for i in 0..100_u64 {
                    let lac = pool.get();
                    let p = lac.new(i * w as u64);
                    assert_eq!(*lac.get(p).unwrap(), i * w as u64);
                    lac.release();
                }
            });
        }
    });

    let stats = pool.stats();
    assert!(stats.arenas_created <= WORKERS, "{stats}");
    assert_eq!(stats.arena_gets, WORKERS * 100);
    assert_eq!(stats.arenas_idle, stats.arenas_created);
}
