//! Pools of reusable arenas.
//!
//! An [`ArenaPool`] owns a chunk pool shared by all of its arenas, the
//! runtime [`Controls`], and an idle list of arenas. [`ArenaPool::get`]
//! hands out a [`Lac`]; when the last handle to that arena is dropped the
//! arena is reset and comes back here.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::arena::Arena;
use crate::chunk_pool::ChunkPool;
use crate::config::{Controls, LacConfig};
use crate::error::ArenaError;
use crate::lac::Lac;
use crate::pool::Pool;

/// State shared by a pool and every handle it has issued.
pub(crate) struct PoolShared {
    config: Arc<LacConfig>,
    controls: Arc<Controls>,
    chunks: Arc<ChunkPool>,
    arenas: Pool<Arc<Arena>>,
}

impl PoolShared {
    pub(crate) fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Reset `arena` and make it available again.
    pub(crate) fn recycle(&self, arena: Arc<Arena>) {
        arena.reset();
        self.arenas.put(arena);
    }
}

/// A pool of arenas built from one [`LacConfig`].
pub struct ArenaPool {
    shared: Arc<PoolShared>,
}

/// Counters describing pool activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Arena requests served.
    pub arena_gets: usize,
    /// Arenas ever built.
    pub arenas_created: usize,
    /// Arenas waiting for reuse.
    pub arenas_idle: usize,
    /// Nominal chunk requests served.
    pub chunk_gets: usize,
    /// Nominal chunks ever built.
    pub chunks_created: usize,
    /// Nominal chunks waiting for reuse.
    pub chunks_idle: usize,
    /// Oversized chunks ever built.
    pub standalone_chunks: usize,
    /// Nominal chunk size in bytes.
    pub chunk_size: usize,
}

impl PoolStats {
    /// Fraction of chunk requests that had to build a new chunk.
    pub fn chunk_miss_rate(&self) -> f64 {
        if self.chunk_gets == 0 {
            0.0
        } else {
            self.chunks_created as f64 / self.chunk_gets as f64
        }
    }

    /// Bytes held by idle chunks.
    pub fn idle_chunk_bytes(&self) -> usize {
        self.chunks_idle * self.chunk_size
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arenas: {} gets, {} created, {} idle; chunks: {} gets, {} created ({:.1}% miss), {} idle, {} standalone",
            self.arena_gets,
            self.arenas_created,
            self.arenas_idle,
            self.chunk_gets,
            self.chunks_created,
            self.chunk_miss_rate() * 100.0,
            self.chunks_idle,
            self.standalone_chunks
        )
    }
}

impl ArenaPool {
    /// Build a pool after validating `config`.
    pub fn new(config: LacConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: LacConfig) -> Self {
        let controls = Arc::new(Controls::from_config(&config));
        let chunks = Arc::new(ChunkPool::new(config.chunk_size, config.max_chunks));
        let config = Arc::new(config);

        let factory = {
            let config = Arc::clone(&config);
            let controls = Arc::clone(&controls);
            let chunks = Arc::clone(&chunks);
            move || {
                Arc::new(Arena::new(
                    Arc::clone(&config),
                    Arc::clone(&controls),
                    Arc::clone(&chunks),
                ))
            }
        };
        let arenas = Pool::new("arena", config.max_arenas, factory)
            .with_equality(Arc::ptr_eq)
            .with_leak_ceiling(config.max_new_arenas_in_debug);
        arenas.set_debug(config.debug);
        chunks.set_debug(config.debug);

        Self {
            shared: Arc::new(PoolShared {
                config,
                controls,
                chunks,
                arenas,
            }),
        }
    }

    /// Take an arena, creating one if none is idle.
    ///
    /// # Panics
    ///
    /// In debug mode, panics if more than `max_new_arenas_in_debug` arenas
    /// had to be built because none was idle, which usually means handles
    /// are leaking. Arenas from [`reserve_arenas`](Self::reserve_arenas)
    /// do not count.
    pub fn get(&self) -> Lac {
        let arena = self.shared.arenas.get();
        debug_assert_eq!(arena.share_count(), 1);
        Lac::from_parts(arena, Arc::clone(&self.shared))
    }

    /// The pool's configuration.
    pub fn config(&self) -> &LacConfig {
        &self.shared.config
    }

    /// Whether debug mode is on.
    pub fn debug(&self) -> bool {
        self.shared.controls.debug()
    }

    /// Turn debug mode on or off for every arena of this pool.
    pub fn set_debug(&self, on: bool) {
        self.shared.controls.set_debug(on);
        self.shared.arenas.set_debug(on);
        self.shared.chunks.set_debug(on);
    }

    /// Whether the kill switch is set.
    pub fn disabled(&self) -> bool {
        self.shared.controls.disabled()
    }

    /// Set the kill switch. Arenas pick it up when they are next created
    /// or reset.
    pub fn set_disabled(&self, on: bool) {
        self.shared.controls.set_disabled(on);
    }

    /// Pre-build up to `n` chunks. Returns how many were added.
    pub fn reserve_chunks(&self, n: usize) -> usize {
        self.shared.chunks.reserve(n)
    }

    /// Pre-build up to `n` arenas. Returns how many were added.
    pub fn reserve_arenas(&self, n: usize) -> usize {
        self.shared.arenas.reserve(n)
    }

    /// Drop every idle arena and chunk.
    pub fn clear(&self) {
        self.shared.arenas.clear();
        self.shared.chunks.clear();
    }

    /// Activity counters.
    pub fn stats(&self) -> PoolStats {
        let chunks = &self.shared.chunks;
        let arenas = &self.shared.arenas;
        PoolStats {
            arena_gets: arenas.gets(),
            arenas_created: arenas.created(),
            arenas_idle: arenas.len(),
            chunk_gets: chunks.gets(),
            chunks_created: chunks.created(),
            chunks_idle: chunks.idle(),
            standalone_chunks: chunks.standalone(),
            chunk_size: chunks.chunk_size(),
        }
    }

    /// Emit [`stats`](Self::stats) at info level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            arena_gets = stats.arena_gets,
            arenas_created = stats.arenas_created,
            arenas_idle = stats.arenas_idle,
            chunk_gets = stats.chunk_gets,
            chunks_created = stats.chunks_created,
            chunks_idle = stats.chunks_idle,
            standalone_chunks = stats.standalone_chunks,
            miss_rate = stats.chunk_miss_rate(),
            "arena pool stats"
        );
    }
}

impl Default for ArenaPool {
    fn default() -> Self {
        Self::build(LacConfig::default())
    }
}

impl fmt::Debug for ArenaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaPool")
            .field("stats", &self.stats())
            .field("debug", &self.debug())
            .field("disabled", &self.disabled())
            .finish()
    }
}

/// The process-wide pool, built on first use with the default config.
pub fn global() -> &'static ArenaPool {
    static GLOBAL: OnceLock<ArenaPool> = OnceLock::new();
    GLOBAL.get_or_init(ArenaPool::default)
}

// Compile-time assertion: pools are shared between threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ArenaPool>();
};

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ArenaPool {
        ArenaPool::new(LacConfig::new().with_chunk_size(512)).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = ArenaPool::new(LacConfig::new().with_chunk_size(3)).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidConfig { .. }));
    }

    #[test]
    fn released_arena_is_reused() {
        let pool = small();
        let lac = pool.get();
        let id = lac.id();
        lac.release();
        let again = pool.get();
        assert_eq!(again.id(), id);
        assert_eq!(again.epoch(), 1);
        assert_eq!(pool.stats().arenas_created, 1);
    }

    #[test]
    fn chunks_return_to_the_pool_on_reset() {
        let pool = small();
        let lac = pool.get();
        for _ in 0..100 {
            let _ = lac.new(0_u64);
        }
        let used = lac.stats().chunks;
        assert!(used >= 2);
        drop(lac);
        let stats = pool.stats();
        assert_eq!(stats.chunks_idle, used);
        assert_eq!(stats.chunks_created, used);
    }

    #[test]
    fn reserve_and_clear() {
        let pool = small();
        assert_eq!(pool.reserve_chunks(8), 8);
        assert_eq!(pool.reserve_arenas(3), 3);
        let stats = pool.stats();
        assert_eq!(stats.chunks_idle, 8);
        assert_eq!(stats.arenas_idle, 3);
        assert_eq!(stats.idle_chunk_bytes(), 8 * 512);
        pool.clear();
        let stats = pool.stats();
        assert_eq!(stats.chunks_idle, 0);
        assert_eq!(stats.arenas_idle, 0);
    }

    #[test]
    #[should_panic(expected = "arena pool leak")]
    fn leaking_handles_trips_the_ceiling_in_debug() {
        let mut config = LacConfig::new().with_debug(true);
        config.max_new_arenas_in_debug = 2;
        let pool = ArenaPool::new(config).unwrap();
        let held: Vec<Lac> = (0..3).map(|_| pool.get()).collect();
        drop(held);
    }

    #[test]
    fn reserved_arenas_do_not_trip_the_ceiling() {
        let mut config = LacConfig::new().with_debug(true);
        config.max_new_arenas_in_debug = 2;
        let pool = ArenaPool::new(config).unwrap();
        assert_eq!(pool.reserve_arenas(4), 4);
        let held: Vec<Lac> = (0..5).map(|_| pool.get()).collect();
        assert_eq!(pool.stats().arenas_created, 5);
        drop(held);
        assert_eq!(pool.stats().arenas_idle, 5);
    }

    #[test]
    fn kill_switch_applies_on_reset() {
        let pool = small();
        let lac = pool.get();
        assert!(!lac.is_disabled());
        pool.set_disabled(true);
        assert!(!lac.is_disabled());
        lac.release();
        assert!(pool.get().is_disabled());
    }

    #[test]
    fn stats_display_mentions_miss_rate() {
        let pool = small();
        let _ = pool.get().new(1_u32);
        let text = pool.stats().to_string();
        assert!(text.contains("miss"));
        pool.log_stats();
    }

    #[test]
    fn global_pool_is_shared() {
        assert!(std::ptr::eq(global(), global()));
        let lac = global().get();
        assert_eq!(*lac.get(lac.new(5_i16)).unwrap(), 5);
    }
}
