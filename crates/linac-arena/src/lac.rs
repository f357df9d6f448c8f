//! Per-task arena handles and the typed allocation API.
//!
//! A [`Lac`] is one task's share of an [`Arena`]. It is `Send` but not
//! `Sync`: a task that wants another task to allocate from the same arena
//! calls [`Lac::inc_ref`] *before* spawning it and moves the new handle
//! in. The share count therefore equals the number of tasks that can
//! allocate, and a count of one is what lets [`Arena`] skip atomic
//! read-modify-writes.
//!
//! Values live in arena memory until the last handle is dropped. At that
//! point the arena is reset and returned to its pool, and every handle it
//! issued turns stale.

#![allow(unsafe_code)]

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::arena::{Arena, ArenaStats};
use crate::arena_pool::PoolShared;
use crate::check::{CheckReport, Scan};
use crate::error::ArenaError;
use crate::handle::{ArenaId, FnRef, MapCell, MapRef, Ptr, SharedFn, Slice, Stamp, Str};
use crate::raw::WORD;
use crate::registry::ExternalKind;

/// A handle to a pooled arena.
///
/// Obtain one from [`ArenaPool::get`](crate::ArenaPool::get). Dropping the
/// last handle to an arena resets it.
pub struct Lac {
    arena: Arc<Arena>,
    home: Arc<PoolShared>,
    _not_sync: PhantomData<Cell<()>>,
}

// Compile-time assertion: handles move between threads.
const _: fn() = || {
    fn assert<T: Send>() {}
    assert::<Lac>();
};

/// Reject types that cannot live in arena memory.
const fn assert_storable<T>() {
    assert!(
        mem::align_of::<T>() <= WORD,
        "arena values must not need more than word alignment"
    );
    assert!(
        !mem::needs_drop::<T>(),
        "arena values must not need drop"
    );
}

impl Lac {
    pub(crate) fn from_parts(arena: Arc<Arena>, home: Arc<PoolShared>) -> Self {
        Self {
            arena,
            home,
            _not_sync: PhantomData,
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Share the arena with another task.
    ///
    /// Call this on the spawning side and move the returned handle into
    /// the new task.
    pub fn inc_ref(&self) -> Lac {
        self.arena.acquire_share();
        Lac::from_parts(Arc::clone(&self.arena), Arc::clone(&self.home))
    }

    /// Give up this task's share. Same as dropping the handle.
    pub fn dec_ref(self) {
        drop(self);
    }

    /// The owner's final release.
    ///
    /// # Panics
    ///
    /// In debug mode, panics if other handles to the arena are still alive.
    pub fn release(self) {
        let handles = self.arena.share_count();
        if handles > 1 && self.home.controls().debug() {
            panic!(
                "arena {} released while {} other handles are alive",
                self.arena.id(),
                handles - 1
            );
        }
        drop(self);
    }

    /// Identity of the underlying arena.
    pub fn id(&self) -> ArenaId {
        self.arena.id()
    }

    /// Current epoch of the underlying arena.
    pub fn epoch(&self) -> u64 {
        self.arena.epoch()
    }

    /// Number of live handles to the underlying arena.
    pub fn share_count(&self) -> i32 {
        self.arena.share_count()
    }

    /// Whether allocations bypass arena chunks.
    pub fn is_disabled(&self) -> bool {
        self.arena.is_disabled()
    }

    /// Usage snapshot of the underlying arena.
    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// A pointer to the arena control block itself.
    pub fn arena_ptr(&self) -> Ptr<Arena> {
        Ptr::new(NonNull::from(&*self.arena), self.arena.stamp())
    }

    // ── Raw allocation ──────────────────────────────────────────

    /// Reserve `size` bytes, rounded up to a whole word.
    ///
    /// The memory is uninitialised unless `zero` is set. It stays valid
    /// until the arena is reset.
    ///
    /// # Panics
    ///
    /// Panics if `size` overflows when rounded up to a word, or if a
    /// standalone chunk of that size cannot be laid out (larger than
    /// `isize::MAX`).
    pub fn alloc(&self, size: usize, zero: bool) -> NonNull<u8> {
        self.arena.alloc(size, zero)
    }

    fn alloc_array<T>(&self, n: usize, zero: bool) -> NonNull<T> {
        const { assert_storable::<T>() };
        let bytes = mem::size_of::<T>()
            .checked_mul(n)
            .unwrap_or_else(|| panic!("array of {n} elements overflows the address space"));
        self.arena.alloc(bytes, zero).cast::<T>()
    }

    fn validate(&self, stamp: Stamp) -> Result<(), ArenaError> {
        if stamp.is_unmanaged() {
            return Ok(());
        }
        let arena = self.arena.id();
        if stamp.arena != arena {
            return Err(ArenaError::ForeignHandle {
                handle_arena: stamp.arena,
                arena,
            });
        }
        let current_epoch = self.arena.epoch();
        if stamp.epoch != current_epoch {
            return Err(ArenaError::StaleHandle {
                handle_epoch: stamp.epoch,
                current_epoch,
            });
        }
        Ok(())
    }

    // ── Single values ───────────────────────────────────────────

    /// Move `value` into the arena.
    ///
    /// In debug mode, struct values become safety-checker roots.
    pub fn new<T: Scan>(&self, value: T) -> Ptr<T> {
        let ptr = self.alloc_array::<T>(1, false);
        // SAFETY: fresh, word-aligned, exclusively ours, sized for one `T`.
        unsafe { ptr.as_ptr().write(value) };
        self.arena.register_root::<T>(ptr.as_ptr() as usize);
        Ptr::new(ptr, self.arena.stamp())
    }

    /// Allocate zeroed memory and place `T::default()` in it.
    pub fn new_default<T: Scan + Default>(&self) -> Ptr<T> {
        let ptr = self.alloc_array::<T>(1, true);
        // SAFETY: as in `new`.
        unsafe { ptr.as_ptr().write(T::default()) };
        self.arena.register_root::<T>(ptr.as_ptr() as usize);
        Ptr::new(ptr, self.arena.stamp())
    }

    /// Borrow the target of `ptr`.
    pub fn get<T>(&self, ptr: Ptr<T>) -> Result<&T, ArenaError> {
        self.validate(ptr.stamp())?;
        // SAFETY: the stamp proves the target was written during this
        // arena generation (or is leaked and immortal), and the generation
        // cannot end while `self` is alive.
        Ok(unsafe { ptr.as_non_null().as_ref() })
    }

    /// Mutably borrow the target of `ptr`.
    ///
    /// # Safety
    ///
    /// No other reference to the target may exist for the lifetime of the
    /// result, including ones obtained through copies of `ptr` and the
    /// reads performed by [`Lac::check`]. The target must not be an
    /// attached external value.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, ptr: Ptr<T>) -> Result<&mut T, ArenaError> {
        self.validate(ptr.stamp())?;
        // SAFETY: validity as in `get`; exclusivity is the caller's promise.
        Ok(unsafe { ptr.as_non_null().as_mut() })
    }

    // ── Growable arrays ─────────────────────────────────────────

    /// A growable array of `len` default elements with room for `cap`.
    ///
    /// # Panics
    ///
    /// Panics if `len > cap`.
    pub fn new_slice<T: Copy + Default + 'static>(&self, len: usize, cap: usize) -> Slice<T> {
        if len > cap {
            panic!("new_slice: len {len} exceeds cap {cap}");
        }
        if cap == 0 {
            return Slice::empty();
        }
        let ptr = self.alloc_array::<T>(cap, false);
        for i in 0..len {
            // SAFETY: `i < len <= cap`, inside the fresh allocation.
            unsafe { ptr.as_ptr().add(i).write(T::default()) };
        }
        Slice::new(ptr, len, cap, self.arena.stamp())
    }

    /// Copy `values` into a new arena array with `cap == len`.
    pub fn copy_slice<T: Copy + 'static>(&self, values: &[T]) -> Slice<T> {
        if values.is_empty() {
            return Slice::empty();
        }
        let ptr = self.alloc_array::<T>(values.len(), false);
        // SAFETY: the destination is fresh and sized for `values.len()`.
        unsafe { ptr::copy_nonoverlapping(values.as_ptr(), ptr.as_ptr(), values.len()) };
        Slice::new(ptr, values.len(), values.len(), self.arena.stamp())
    }

    /// Borrow the elements of `slice`.
    pub fn slice<T>(&self, slice: &Slice<T>) -> Result<&[T], ArenaError> {
        self.validate(slice.stamp())?;
        // SAFETY: as in `get`; the first `len` elements are initialised.
        Ok(unsafe { std::slice::from_raw_parts(slice.as_non_null().as_ptr(), slice.len()) })
    }

    /// Mutably borrow the elements of `slice`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Lac::get_mut`], applied to every element.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut<T>(&self, slice: &mut Slice<T>) -> Result<&mut [T], ArenaError> {
        self.validate(slice.stamp())?;
        // SAFETY: validity as in `slice`; exclusivity is the caller's promise.
        Ok(unsafe { std::slice::from_raw_parts_mut(slice.as_non_null().as_ptr(), slice.len()) })
    }

    /// Append one element, growing the array if needed.
    pub fn append<T: Copy + 'static>(
        &self,
        slice: Slice<T>,
        value: T,
    ) -> Result<Slice<T>, ArenaError> {
        self.extend(slice, std::slice::from_ref(&value))
    }

    /// Append `values`, growing the array if needed.
    ///
    /// Spare capacity is written in place. Otherwise the contents move to
    /// a new backing range of `max(cap * growth_ratio, needed, min_cap)`
    /// elements; the old range is left untouched.
    pub fn extend<T: Copy + 'static>(
        &self,
        slice: Slice<T>,
        values: &[T],
    ) -> Result<Slice<T>, ArenaError> {
        self.validate(slice.stamp())?;
        if values.is_empty() {
            return Ok(slice);
        }
        let len = slice.len();
        let needed = len
            .checked_add(values.len())
            .unwrap_or_else(|| panic!("extend: length overflows usize"));
        let stamp = self.arena.stamp();
        let src = slice.as_non_null().as_ptr();

        // Externally backed arrays always have cap == len, so only arena
        // memory is ever written in place.
        if needed <= slice.cap() && slice.stamp() == stamp {
            // SAFETY: `[len, needed)` is spare capacity of an arena array
            // owned by the consumed handle; nothing else can refer to it.
            unsafe { ptr::copy_nonoverlapping(values.as_ptr(), src.add(len), values.len()) };
            return Ok(Slice::new(slice.as_non_null(), needed, slice.cap(), stamp));
        }

        let cap = self.grown_capacity(slice.cap(), needed);
        let dst = self.alloc_array::<T>(cap, false);
        // SAFETY: `dst` is fresh with room for `cap >= needed` elements;
        // `src` holds `len` initialised elements validated above.
        unsafe {
            ptr::copy_nonoverlapping(src, dst.as_ptr(), len);
            ptr::copy_nonoverlapping(values.as_ptr(), dst.as_ptr().add(len), values.len());
        }
        Ok(Slice::new(dst, needed, cap, stamp))
    }

    fn grown_capacity(&self, cap: usize, needed: usize) -> usize {
        let config = self.arena.config();
        let grown = (cap as f64 * config.slice_growth_ratio).ceil() as usize;
        grown.max(needed).max(config.min_slice_capacity)
    }

    // ── Strings ─────────────────────────────────────────────────

    /// Copy `s` into the arena.
    pub fn new_str(&self, s: &str) -> Str {
        if s.is_empty() {
            return Str::default();
        }
        let ptr = self.alloc_array::<u8>(s.len(), false);
        // SAFETY: fresh destination sized for `s.len()` bytes.
        unsafe { ptr::copy_nonoverlapping(s.as_ptr(), ptr.as_ptr(), s.len()) };
        Str::new(ptr, s.len(), self.arena.stamp())
    }

    /// Borrow the contents of `s`.
    pub fn str(&self, s: Str) -> Result<&str, ArenaError> {
        self.validate(s.stamp())?;
        // SAFETY: the bytes were copied from a `&str` (or point into one)
        // and are immutable; validity as in `get`.
        Ok(unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(
                s.as_non_null().as_ptr(),
                s.len(),
            ))
        })
    }

    // ── External values ─────────────────────────────────────────

    /// Create an empty map with room for `cap` entries, attached to this
    /// arena.
    pub fn new_map<K, V>(&self, cap: usize) -> MapRef<K, V>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.attach_map(Arc::new(MapCell::new(indexmap::IndexMap::with_capacity(
            cap,
        ))))
    }

    /// Borrow the map behind `map`.
    pub fn map<K, V>(&self, map: MapRef<K, V>) -> Result<&MapCell<K, V>, ArenaError> {
        self.validate(map.stamp())?;
        // SAFETY: the map registry (or a leak) keeps the cell alive for at
        // least as long as this generation.
        Ok(unsafe { map.as_non_null().as_ref() })
    }

    /// Keep `value` alive until reset and point at it.
    pub fn attach<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Ptr<T> {
        let ptr = Ptr::new(NonNull::from(&*value), self.arena.stamp());
        self.arena
            .keep_alive(ExternalKind::Pointer, ptr.addr(), Box::new(value));
        ptr
    }

    /// Keep `values` alive until reset and refer to them. The result has
    /// `cap == len`, so growing it always copies into the arena.
    pub fn attach_slice<T: Send + Sync + 'static>(&self, values: Arc<[T]>) -> Slice<T> {
        if values.is_empty() {
            return Slice::empty();
        }
        let len = values.len();
        let slice = Slice::new(
            NonNull::from(&*values).cast::<T>(),
            len,
            len,
            self.arena.stamp(),
        );
        self.arena
            .keep_alive(ExternalKind::Array, slice.addr(), Box::new(values));
        slice
    }

    /// Keep `s` alive until reset and refer to it.
    pub fn attach_str(&self, s: Arc<str>) -> Str {
        if s.is_empty() {
            return Str::default();
        }
        let handle = Str::new(NonNull::from(&*s).cast::<u8>(), s.len(), self.arena.stamp());
        self.arena
            .keep_alive(ExternalKind::String, handle.addr(), Box::new(s));
        handle
    }

    /// Keep `map` alive until reset and refer to it.
    pub fn attach_map<K, V>(&self, map: Arc<MapCell<K, V>>) -> MapRef<K, V>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let handle = MapRef::new(NonNull::from(&*map), self.arena.stamp());
        self.arena
            .keep_alive(ExternalKind::Map, handle.addr(), Box::new(map));
        handle
    }

    /// Keep `f` alive until reset and refer to it.
    pub fn attach_fn<A: 'static, R: 'static>(&self, f: Arc<SharedFn<A, R>>) -> FnRef<A, R> {
        let handle = FnRef::new(NonNull::from(&*f), self.arena.stamp());
        self.arena
            .keep_alive(ExternalKind::Function, handle.addr(), Box::new(f));
        handle
    }

    /// Invoke the closure behind `f`.
    pub fn call<A: 'static, R: 'static>(&self, f: FnRef<A, R>, arg: A) -> Result<R, ArenaError> {
        self.validate(f.stamp())?;
        // SAFETY: the function registry (or a leak) keeps the closure alive.
        let func = unsafe { f.as_non_null().as_ref() };
        Ok(func(arg))
    }

    // ── Checking ────────────────────────────────────────────────

    /// Run the safety checker now, without invalidating anything.
    ///
    /// Requires this to be the only handle, since the checker reads arena
    /// memory that other tasks could be writing.
    pub fn check(&self) -> Result<CheckReport, ArenaError> {
        let handles = self.arena.share_count();
        if handles > 1 {
            return Err(ArenaError::Shared { handles });
        }
        if self.arena.is_disabled() {
            return Ok(CheckReport::default());
        }
        Ok(self.arena.check(false)?)
    }
}

impl Drop for Lac {
    fn drop(&mut self) {
        if self.arena.release_share() {
            self.home.recycle(Arc::clone(&self.arena));
        }
    }
}

impl fmt::Debug for Lac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lac").field("arena", &self.arena).finish()
    }
}
