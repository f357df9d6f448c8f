//! Chunked linear arenas with pooled recycling.
//!
//! Allocation is a pointer bump inside a fixed-size chunk. Nothing is
//! freed individually: when the last [`Lac`] handle to an arena goes away,
//! the whole arena is reset in one step and returned to its pool, and its
//! chunks go back to a shared chunk pool for the next arena.
//!
//! # Architecture
//!
//! ```text
//! ArenaPool (one per config, or the process-wide `global()`)
//! ├── Controls (debug mode, kill switch)
//! ├── ChunkPool → Pool<Box<Chunk>> (nominal-size chunks)
//! └── Pool<Arc<Arena>>
//!     └── Arena
//!         ├── ChunkList + current chunk (AtomicPtr)
//!         ├── share count, epoch
//!         ├── external registries (pointer/array/string/map/function)
//!         └── debug roots → safety checker
//! ```
//!
//! # Sharing
//!
//! A [`Lac`] is `Send` but not `Sync`. To let another thread allocate from
//! the same arena, call [`Lac::inc_ref`] and move the new handle into it.
//! While a single handle exists the bump is a plain load and store; with
//! more than one, chunk cursors and chunk installation switch to
//! compare-and-swap.
//!
//! # Handles
//!
//! Arena memory is reached through [`Ptr`], [`Slice`], [`Str`], [`MapRef`]
//! and [`FnRef`]. Each carries the issuing arena and epoch, and every
//! dereference goes through a [`Lac`], so using a handle after its arena
//! was reset yields [`ArenaError::StaleHandle`] rather than recycled
//! memory.
//!
//! # Debug mode
//!
//! With debug mode on, struct values allocated through [`Lac::new`]
//! become roots for the [safety checker](check). On reset it walks them
//! and panics if arena memory refers to anything that will not survive
//! the reset: values that are neither in the arena nor
//! [attached](Lac::attach) to it.
//!
//! # Unsafe code
//!
//! The crate denies `unsafe` by default. It is allowed in `raw` (the
//! global allocator), `chunk`, `arena`, `handle`, `registry`, `check` and
//! `lac`; every block carries a `// SAFETY:` comment.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod arena_pool;
pub mod check;
pub mod chunk;
pub mod chunk_pool;
pub mod config;
pub mod error;
pub mod handle;
pub mod lac;
pub mod pool;
mod raw;
mod registry;

// Public re-exports for the primary API surface.
pub use arena::{Arena, ArenaStats};
pub use arena_pool::{global, ArenaPool, PoolStats};
pub use check::{CheckReport, Checker, Kind, Scan};
pub use chunk::Chunk;
pub use chunk_pool::ChunkPool;
pub use config::{Controls, LacConfig};
pub use error::{ArenaError, CheckError, ViolationKind};
pub use handle::{ArenaId, FnRef, MapCell, MapRef, Ptr, SharedFn, Slice, Str};
pub use lac::Lac;
pub use pool::Pool;
pub use raw::WORD;
pub use registry::ExternalKind;
