//! Test utilities for linac development.
//!
//! Provides small-config pool builders, one-time tracing setup for tests,
//! and (in [`fixtures`]) sample structs with [`Scan`](linac_arena::Scan)
//! implementations for exercising the safety checker.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::Once;

use linac_arena::{ArenaPool, LacConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chunk size used by the small pools: big enough for the fixtures, small
/// enough that tests cross chunk boundaries quickly.
pub const SMALL_CHUNK: usize = 4096;

static INIT: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `linac_arena=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "linac_arena=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Config with [`SMALL_CHUNK`]-byte chunks and everything else default.
pub fn small_config() -> LacConfig {
    LacConfig::new().with_chunk_size(SMALL_CHUNK)
}

/// A fresh pool built from [`small_config`].
pub fn small_pool() -> ArenaPool {
    init_tracing();
    ArenaPool::new(small_config()).expect("small config is valid")
}

/// A fresh pool built from [`small_config`] with debug mode on.
pub fn debug_pool() -> ArenaPool {
    init_tracing();
    ArenaPool::new(small_config().with_debug(true)).expect("small config is valid")
}
