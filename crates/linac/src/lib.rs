//! Linac: a chunked linear arena allocator.
//!
//! This is the top-level facade crate that re-exports the public API of
//! `linac-arena`. For most users, adding `linac` as a single dependency is
//! sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use linac::prelude::*;
//!
//! #[derive(Clone, Copy)]
//! struct Point {
//!     x: i64,
//!     y: i64,
//! }
//! linac::impl_scan!(Point { x, y });
//!
//! let pool = ArenaPool::new(LacConfig::new().with_chunk_size(4096)).unwrap();
//! let lac = pool.get();
//!
//! let p = lac.new(Point { x: 1, y: 2 });
//! let name = lac.new_str("origin");
//! let mut path = Slice::empty();
//! for step in 0..10_i64 {
//!     path = lac.append(path, step).unwrap();
//! }
//!
//! assert_eq!(lac.get(p).unwrap().y, 2);
//! assert_eq!(lac.str(name).unwrap(), "origin");
//! assert_eq!(lac.slice(&path).unwrap().len(), 10);
//!
//! // Releasing the last handle resets the arena; its handles go stale.
//! lac.release();
//! let lac = pool.get();
//! assert!(matches!(lac.get(p), Err(ArenaError::StaleHandle { .. })));
//! ```
//!
//! # Sharing across threads
//!
//! ```rust
//! use linac::prelude::*;
//!
//! let lac = linac::global().get();
//! let helper = lac.inc_ref();
//! let worker = std::thread::spawn(move || {
//!     let s = helper.copy_slice(&[1_u32, 2, 3]);
//!     let len = s.len();
//!     helper.dec_ref();
//!     len
//! });
//! assert_eq!(worker.join().unwrap(), 3);
//! assert_eq!(lac.share_count(), 1);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`arena`] | `linac-arena` | Arenas, pools, handles and the safety checker |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Arenas, pools, handles and the safety checker (`linac-arena`).
///
/// Most users only need the types in the [`prelude`].
pub use linac_arena as arena;

pub use linac_arena::{global, impl_scan};

/// Common imports for typical linac usage.
///
/// ```rust
/// use linac::prelude::*;
/// ```
///
/// This imports the pool and handle types, the configuration, the handle
/// types for arena values, and the checker trait.
pub mod prelude {
    // Pools and handles
    pub use linac_arena::{ArenaPool, Lac, LacConfig};

    // Arena values
    pub use linac_arena::{FnRef, MapCell, MapRef, Ptr, SharedFn, Slice, Str};

    // Checking
    pub use linac_arena::{CheckReport, Checker, Scan};

    // Errors
    pub use linac_arena::{ArenaError, CheckError};
}
