//! Benchmark profiles and utilities for the linac arena allocator.
//!
//! Provides deterministic allocation workloads for benchmarks:
//!
//! - [`small_objects`]: many word-sized values, the common request-scoped case
//! - [`mixed_objects`]: sizes spread up to a quarter chunk
//! - [`size_mix`]: the seeded size sequence for any [`Profile`]

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use linac_arena::{ArenaPool, LacConfig};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Chunk size used by every benchmark pool.
pub const BENCH_CHUNK: usize = 64 * 1024;

/// A family of allocation requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Profile {
    /// Name used as the benchmark id.
    pub name: &'static str,
    /// Smallest request in bytes.
    pub min_size: usize,
    /// Largest request in bytes, inclusive.
    pub max_size: usize,
    /// Requests issued per arena generation.
    pub ops: usize,
}

/// 4096 requests of 1 to 16 bytes.
pub fn small_objects() -> Profile {
    Profile {
        name: "small_objects",
        min_size: 1,
        max_size: 16,
        ops: 4096,
    }
}

/// 1024 requests of 8 bytes up to a quarter of [`BENCH_CHUNK`].
pub fn mixed_objects() -> Profile {
    Profile {
        name: "mixed_objects",
        min_size: 8,
        max_size: BENCH_CHUNK / 4,
        ops: 1024,
    }
}

/// The request sizes for `profile`, reproducible from `seed`.
pub fn size_mix(profile: &Profile, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..profile.ops)
        .map(|_| rng.gen_range(profile.min_size..=profile.max_size))
        .collect()
}

/// A pool sized for the benchmarks, with debug checks off.
pub fn bench_pool() -> ArenaPool {
    let pool = ArenaPool::new(LacConfig::new().with_chunk_size(BENCH_CHUNK))
        .unwrap_or_else(|err| panic!("benchmark config rejected: {err}"));
    pool.reserve_chunks(64);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_mix_is_deterministic() {
        let profile = mixed_objects();
        assert_eq!(size_mix(&profile, 42), size_mix(&profile, 42));
        assert_ne!(size_mix(&profile, 42), size_mix(&profile, 43));
    }

    #[test]
    fn size_mix_respects_bounds() {
        let profile = small_objects();
        let sizes = size_mix(&profile, 7);
        assert_eq!(sizes.len(), profile.ops);
        assert!(sizes
            .iter()
            .all(|&s| (profile.min_size..=profile.max_size).contains(&s)));
    }

    #[test]
    fn bench_pool_is_warm() {
        let pool = bench_pool();
        let stats = pool.stats();
        assert_eq!(stats.chunks_idle, 64);
        assert_eq!(stats.chunk_size, BENCH_CHUNK);
    }
}
