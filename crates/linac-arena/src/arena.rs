//! The arena control block.
//!
//! An [`Arena`] serves word-aligned allocations from a chain of chunks.
//! While exactly one [`Lac`](crate::Lac) handle refers to it, allocation
//! is a relaxed load and store on the current chunk's cursor. Once the
//! arena is shared, allocation switches to a CAS loop, and installing a
//! fresh chunk is itself a CAS on [`Arena::current`]; the loser hands its
//! spare chunk back to the pool and retries.
//!
//! Nothing allocated from an arena is freed individually. When the last
//! handle goes away the arena is [reset](Arena::reset): chunks go back to
//! the chunk pool, external keep-alives are dropped, and the epoch is
//! bumped so that every outstanding handle becomes stale.

#![allow(unsafe_code)]

use std::any::TypeId;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::check::{self, ArenaView, CheckReport, Kind, Scan};
use crate::chunk::{Bump, Chunk, ChunkList};
use crate::chunk_pool::ChunkPool;
use crate::config::{Controls, LacConfig};
use crate::error::CheckError;
use crate::handle::{ArenaId, Stamp};
use crate::raw::{self, align_up, RawBuffer};
use crate::registry::{ExternalKind, Externals, Retained, Root, RootList};

/// Allocations and keep-alives of an arena running with the kill switch on.
#[derive(Default)]
struct Natives {
    buffers: Vec<RawBuffer>,
    retained: Vec<Box<dyn Retained>>,
}

/// A chunked linear allocator.
///
/// Arenas are created and recycled by an [`ArenaPool`](crate::ArenaPool)
/// and used through [`Lac`](crate::Lac) handles.
pub struct Arena {
    id: ArenaId,
    config: Arc<LacConfig>,
    controls: Arc<Controls>,
    chunk_pool: Arc<ChunkPool>,
    chunks: Mutex<ChunkList>,
    current: AtomicPtr<Chunk>,
    share: AtomicI32,
    epoch: AtomicU64,
    disabled: AtomicBool,
    externals: Mutex<Externals>,
    roots: Mutex<RootList>,
    natives: Mutex<Natives>,
}

/// Point-in-time usage of one arena.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ArenaStats {
    /// Chunks installed since the last reset.
    pub chunks: usize,
    /// How many of those are larger than the nominal size.
    pub standalone_chunks: usize,
    /// Bytes handed out.
    pub bytes_used: usize,
    /// Total capacity of the installed chunks.
    pub bytes_reserved: usize,
    /// Debug roots recorded.
    pub roots: usize,
    /// External values recorded across all registries.
    pub externals: usize,
    /// Pass-through allocations made while disabled.
    pub native_allocations: usize,
}

impl ArenaStats {
    /// Fraction of reserved bytes actually handed out, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.bytes_reserved == 0 {
            0.0
        } else {
            self.bytes_used as f64 / self.bytes_reserved as f64
        }
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunks ({} standalone), {}/{} bytes used ({:.1}%), {} roots, {} externals",
            self.chunks,
            self.standalone_chunks,
            self.bytes_used,
            self.bytes_reserved,
            self.utilization() * 100.0,
            self.roots,
            self.externals
        )
    }
}

impl Arena {
    pub(crate) fn new(
        config: Arc<LacConfig>,
        controls: Arc<Controls>,
        chunk_pool: Arc<ChunkPool>,
    ) -> Self {
        let disabled = controls.disabled();
        Self {
            id: ArenaId::next(),
            config,
            controls,
            chunk_pool,
            chunks: Mutex::new(ChunkList::default()),
            current: AtomicPtr::new(ptr::null_mut()),
            share: AtomicI32::new(1),
            epoch: AtomicU64::new(0),
            disabled: AtomicBool::new(disabled),
            externals: Mutex::new(Externals::default()),
            roots: Mutex::new(RootList::default()),
            natives: Mutex::new(Natives::default()),
        }
    }

    /// Process-unique identity.
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Number of resets so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Live handle count.
    pub fn share_count(&self) -> i32 {
        self.share.load(Ordering::Acquire)
    }

    /// Whether allocations currently bypass the chunks.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub(crate) fn config(&self) -> &LacConfig {
        &self.config
    }

    pub(crate) fn stamp(&self) -> Stamp {
        Stamp::new(self.id, self.epoch())
    }

    fn self_addr(&self) -> usize {
        self as *const Self as usize
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Reserve `size` bytes (rounded up to a whole word, minimum one word).
    ///
    /// The memory is uninitialised unless `zero` is set.
    ///
    /// # Panics
    ///
    /// Panics if `size` overflows once rounded.
    pub(crate) fn alloc(&self, size: usize, zero: bool) -> NonNull<u8> {
        let aligned = align_up(size)
            .unwrap_or_else(|| panic!("allocation of {size} bytes overflows the address space"));
        let ptr = if self.is_disabled() {
            self.alloc_native(aligned)
        } else if self.share.load(Ordering::Acquire) <= 1 {
            self.alloc_exclusive(aligned)
        } else {
            self.alloc_shared(aligned)
        };
        if zero {
            // SAFETY: `aligned` bytes at `ptr` were just reserved for us.
            unsafe { raw::zero(ptr, aligned) };
        }
        ptr
    }

    fn alloc_exclusive(&self, aligned: usize) -> NonNull<u8> {
        loop {
            let cur = self.current.load(Ordering::Relaxed);
            // SAFETY: a non-null `current` is owned by `self.chunks` until
            // the next reset, which cannot run while a handle is alive.
            if let Some(chunk) = unsafe { cur.as_ref() } {
                if let Some(ptr) = chunk.bump(aligned) {
                    return ptr;
                }
            }
            let chunk = self.chunk_pool.get(aligned);
            let fresh = self.chunks.lock().push(chunk);
            self.current.store(fresh.as_ptr(), Ordering::Release);
        }
    }

    fn alloc_shared(&self, aligned: usize) -> NonNull<u8> {
        loop {
            let cur = self.current.load(Ordering::Acquire);
            // SAFETY: see `alloc_exclusive`.
            if let Some(chunk) = unsafe { cur.as_ref() } {
                match chunk.try_bump_shared(aligned) {
                    Bump::Done(ptr) => return ptr,
                    Bump::Contended => {
                        thread::yield_now();
                        continue;
                    }
                    Bump::Full => {}
                }
            }
            let fresh = Box::into_raw(self.chunk_pool.get(aligned));
            match self
                .current
                .compare_exchange(cur, fresh, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // SAFETY: `fresh` came from `Box::into_raw` just above
                    // and is now published exactly once.
                    unsafe {
                        self.chunks
                            .lock()
                            .adopt(NonNull::new_unchecked(fresh));
                    }
                }
                Err(_) => {
                    // SAFETY: the CAS failed, so no other thread ever saw
                    // `fresh`; we still own it.
                    self.chunk_pool.put(unsafe { Box::from_raw(fresh) });
                    thread::yield_now();
                }
            }
        }
    }

    fn alloc_native(&self, aligned: usize) -> NonNull<u8> {
        let buffer = RawBuffer::new(aligned);
        let ptr = buffer.at(0);
        self.natives.lock().buffers.push(buffer);
        ptr
    }

    // ── Registries ──────────────────────────────────────────────

    /// Keep `keep` alive until the next reset and record `addr` in the
    /// registry for `kind`.
    pub(crate) fn keep_alive(&self, kind: ExternalKind, addr: usize, keep: Box<dyn Retained>) {
        if self.is_disabled() {
            self.natives.lock().retained.push(keep);
            return;
        }
        self.externals
            .lock()
            .get_mut(kind)
            .record(addr, keep, self.config.dedup_window);
    }

    /// Record a freshly written `T` as a checker root, if debug mode is on
    /// and `T` is a struct.
    pub(crate) fn register_root<T: Scan>(&self, addr: usize) {
        if !matches!(T::KIND, Kind::Struct) || self.is_disabled() || !self.controls.debug() {
            return;
        }
        let root = Root {
            addr,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            scan: check::scan_root::<T>,
        };
        self.roots
            .lock()
            .push(root, self.config.max_debug_roots, self.config.dedup_window);
    }

    // ── Checking and reset ──────────────────────────────────────

    /// Run the safety checker over this generation.
    ///
    /// With `invalidate` set, chunk memory is poisoned after a clean pass.
    /// Invalidation is only sound once no handle can read the memory.
    pub(crate) fn check(&self, invalidate: bool) -> Result<CheckReport, CheckError> {
        let chunks = self.chunks.lock();
        let externals = self.externals.lock();
        let roots = self.roots.lock();
        let report = check::run(
            ArenaView {
                id: self.id,
                epoch: self.epoch(),
                self_addr: self.self_addr(),
                chunks: &chunks,
                externals: &externals,
            },
            &roots,
        )?;
        if invalidate {
            let byte = self.config.poison_byte;
            for chunk in chunks.iter() {
                // SAFETY: invalidating checks run from `reset`, after the
                // last handle is gone.
                unsafe { chunk.poison(byte) };
            }
        }
        Ok(report)
    }

    /// Recycle everything allocated in this generation.
    ///
    /// Must only be called once the share count has reached zero.
    ///
    /// # Panics
    ///
    /// In debug mode, panics with the checker's report if an unaccounted
    /// external reference is found (unless the thread is already
    /// panicking, in which case the check is skipped).
    pub(crate) fn reset(&self) {
        let epoch = self.epoch();
        let mut released = 0;
        let mut bytes_used = 0;
        if !self.is_disabled() {
            if self.controls.debug() {
                if thread::panicking() {
                    warn!(arena = %self.id, "skipping safety check while unwinding");
                } else if let Err(err) = self.check(true) {
                    panic!("arena {} failed safety check: {err}", self.id);
                }
            }
            self.roots.lock().clear();
            self.current.store(ptr::null_mut(), Ordering::Release);
            let mut chunks = self.chunks.lock();
            for chunk in chunks.drain() {
                released += 1;
                bytes_used += chunk.used();
                self.chunk_pool.put(chunk);
            }
        }
        self.externals.lock().clear();
        let natives = std::mem::take(&mut *self.natives.lock());
        let native_allocations = natives.buffers.len();
        drop(natives);

        self.share.store(1, Ordering::Release);
        self.disabled
            .store(self.controls.disabled(), Ordering::Relaxed);
        self.epoch.store(epoch + 1, Ordering::Release);
        debug!(
            arena = %self.id,
            epoch = epoch + 1,
            chunks = released,
            bytes_used,
            native_allocations,
            "arena reset"
        );
    }

    // ── Sharing ─────────────────────────────────────────────────

    pub(crate) fn acquire_share(&self) {
        self.share.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one handle's share. Returns `true` for the last one.
    ///
    /// # Panics
    ///
    /// In debug mode, panics on underflow. Otherwise the count is clamped
    /// at zero and the release is ignored.
    pub(crate) fn release_share(&self) -> bool {
        let prev = self.share.fetch_sub(1, Ordering::AcqRel);
        match prev {
            1 => true,
            p if p <= 0 => {
                self.share.store(0, Ordering::Release);
                if self.controls.debug() {
                    panic!(
                        "arena {} released more times than it was shared (share count {})",
                        self.id,
                        p - 1
                    );
                }
                warn!(arena = %self.id, share = p - 1, "share count underflow clamped to zero");
                false
            }
            _ => false,
        }
    }

    /// Usage snapshot.
    pub fn stats(&self) -> ArenaStats {
        let chunks = self.chunks.lock();
        let nominal = self.chunk_pool.chunk_size();
        let mut stats = ArenaStats::default();
        for chunk in chunks.iter() {
            stats.chunks += 1;
            stats.bytes_used += chunk.used();
            stats.bytes_reserved += chunk.capacity();
            if chunk.capacity() != nominal {
                stats.standalone_chunks += 1;
            }
        }
        stats.roots = self.roots.lock().len();
        stats.externals = self.externals.lock().total();
        stats.native_allocations = self.natives.lock().buffers.len();
        stats
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("epoch", &self.epoch())
            .field("share", &self.share_count())
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}

// Compile-time assertion: Arena is shared across threads through `Arc`.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Arena>();
};
