//! Arena configuration parameters and runtime switches.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ArenaError;
use crate::raw::WORD;

/// Configuration for an [`ArenaPool`](crate::ArenaPool).
///
/// Controls chunk sizing, pool capacity limits, growable-array growth and
/// the debug-mode checker. Validated when the pool is built; all values
/// are immutable afterwards. The `debug` and `disabled` fields only seed
/// the pool's [`Controls`], which can be flipped at runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct LacConfig {
    /// Nominal chunk capacity in bytes.
    ///
    /// Default: 131_072 (128 KiB). Must be a non-zero multiple of the
    /// machine word size. Requests larger than this get a standalone chunk.
    pub chunk_size: usize,

    /// Maximum number of idle chunks kept by the chunk pool.
    ///
    /// Default: 8192. Chunks returned beyond this are freed.
    pub max_chunks: usize,

    /// Maximum number of idle arenas kept by the arena pool.
    ///
    /// Default: 10_000.
    pub max_arenas: usize,

    /// How many arenas the pool may create while debug mode is on before
    /// it assumes handles are leaking and panics.
    ///
    /// Default: 20. Zero disables the ceiling.
    pub max_new_arenas_in_debug: usize,

    /// Capacity multiplier applied when a growable array must reallocate.
    ///
    /// Default: 2.5. Must be greater than 1.
    pub slice_growth_ratio: f64,

    /// Capacity given to an empty growable array on its first growth.
    ///
    /// Default: 4. Must be at least 1.
    pub min_slice_capacity: usize,

    /// Initial state of the debug-mode switch.
    pub debug: bool,

    /// Initial state of the process-wide kill switch.
    pub disabled: bool,

    /// Number of most-recent registry entries scanned for duplicates when
    /// recording an external value or a debug root.
    ///
    /// Default: 16.
    pub dedup_window: usize,

    /// Upper bound on the debug root list of one arena generation.
    ///
    /// Default: 65_536. Roots beyond this are not checked.
    pub max_debug_roots: usize,

    /// Byte written over chunk memory after an invalidating check passes.
    ///
    /// Default: 0xA5.
    pub poison_byte: u8,
}

impl LacConfig {
    /// Default chunk size: 128 KiB.
    pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

    /// Default chunk pool cap.
    pub const DEFAULT_MAX_CHUNKS: usize = 8192;

    /// Default arena pool cap.
    pub const DEFAULT_MAX_ARENAS: usize = 10_000;

    /// Default leak ceiling for arena creation in debug mode.
    pub const DEFAULT_MAX_NEW_ARENAS_IN_DEBUG: usize = 20;

    /// Default growable-array growth ratio.
    pub const DEFAULT_SLICE_GROWTH_RATIO: f64 = 2.5;

    /// Default first-growth capacity.
    pub const DEFAULT_MIN_SLICE_CAPACITY: usize = 4;

    /// Default duplicate-scan window.
    pub const DEFAULT_DEDUP_WINDOW: usize = 16;

    /// Default bound on debug roots.
    pub const DEFAULT_MAX_DEBUG_ROOTS: usize = 65_536;

    /// Default poison pattern.
    pub const DEFAULT_POISON_BYTE: u8 = 0xA5;

    /// Create a config with every parameter at its default.
    pub fn new() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            max_chunks: Self::DEFAULT_MAX_CHUNKS,
            max_arenas: Self::DEFAULT_MAX_ARENAS,
            max_new_arenas_in_debug: Self::DEFAULT_MAX_NEW_ARENAS_IN_DEBUG,
            slice_growth_ratio: Self::DEFAULT_SLICE_GROWTH_RATIO,
            min_slice_capacity: Self::DEFAULT_MIN_SLICE_CAPACITY,
            debug: false,
            disabled: false,
            dedup_window: Self::DEFAULT_DEDUP_WINDOW,
            max_debug_roots: Self::DEFAULT_MAX_DEBUG_ROOTS,
            poison_byte: Self::DEFAULT_POISON_BYTE,
        }
    }

    /// Builder-style override of the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Builder-style override of the initial debug switch.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Builder-style override of the initial kill switch.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Check every parameter, returning the first problem found.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.chunk_size == 0 || self.chunk_size % WORD != 0 {
            return Err(invalid(format!(
                "chunk_size {} must be a non-zero multiple of {WORD}",
                self.chunk_size
            )));
        }
        if self.chunk_size > isize::MAX as usize {
            return Err(invalid(format!(
                "chunk_size {} exceeds isize::MAX",
                self.chunk_size
            )));
        }
        if !(self.slice_growth_ratio > 1.0 && self.slice_growth_ratio.is_finite()) {
            return Err(invalid(format!(
                "slice_growth_ratio {} must be finite and greater than 1",
                self.slice_growth_ratio
            )));
        }
        if self.min_slice_capacity == 0 {
            return Err(invalid("min_slice_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> ArenaError {
    ArenaError::InvalidConfig { reason }
}

impl Default for LacConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime switches shared by a pool and all of its arenas.
#[derive(Debug, Default)]
pub struct Controls {
    debug: AtomicBool,
    disabled: AtomicBool,
}

impl Controls {
    /// Seed the switches from a config.
    pub fn from_config(config: &LacConfig) -> Self {
        Self {
            debug: AtomicBool::new(config.debug),
            disabled: AtomicBool::new(config.disabled),
        }
    }

    /// Whether debug mode is on.
    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Whether the kill switch is set.
    pub fn disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::Relaxed);
    }

    pub(crate) fn set_disabled(&self, on: bool) {
        self.disabled.store(on, Ordering::Relaxed);
    }
}
