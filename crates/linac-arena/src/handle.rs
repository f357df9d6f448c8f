//! Epoch-stamped handles to arena memory.
//!
//! Every handle records the [`ArenaId`] that issued it and the arena's
//! epoch at issue time. The arena bumps its epoch on every reset, so a
//! handle kept past a reset is detected in O(1) when it is dereferenced
//! through [`Lac`](crate::Lac) instead of reading recycled memory.
//!
//! Handles built by the `leak`/`from_static` constructors are not tied to
//! any arena and stay valid forever. The safety checker treats leaked
//! handles stored in arena memory as unaccounted external references.

#![allow(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

/// A map that can be attached to an arena. Arena structs refer to it
/// through a [`MapRef`].
pub type MapCell<K, V> = RwLock<IndexMap<K, V>>;

/// Identity of one arena, unique for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(u64);

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

impl ArenaId {
    /// Issuer of leaked native handles.
    pub const NATIVE: Self = Self(0);
    /// Issuer of handles to `'static` data.
    pub const STATIC: Self = Self(u64::MAX);

    pub(crate) fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NATIVE => f.write_str("native"),
            Self::STATIC => f.write_str("static"),
            Self(id) => write!(f, "#{id}"),
        }
    }
}

/// Issuing arena plus epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Stamp {
    pub(crate) arena: ArenaId,
    pub(crate) epoch: u64,
}

impl Stamp {
    pub(crate) const NATIVE: Self = Self {
        arena: ArenaId::NATIVE,
        epoch: 0,
    };
    pub(crate) const STATIC: Self = Self {
        arena: ArenaId::STATIC,
        epoch: 0,
    };

    pub(crate) fn new(arena: ArenaId, epoch: u64) -> Self {
        Self { arena, epoch }
    }

    /// Not issued by an arena, so never stale.
    pub(crate) fn is_unmanaged(self) -> bool {
        self.arena == ArenaId::NATIVE || self.arena == ArenaId::STATIC
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unmanaged() {
            write!(f, "{}", self.arena)
        } else {
            write!(f, "{}@{}", self.arena, self.epoch)
        }
    }
}

// ── Ptr ─────────────────────────────────────────────────────────

/// A pointer to one `T`.
///
/// Targets live in an arena chunk, in a value attached with
/// [`Lac::attach`](crate::Lac::attach), or (for [`Ptr::leak`]) in a leaked
/// box.
#[must_use]
pub struct Ptr<T> {
    ptr: NonNull<T>,
    stamp: Stamp,
}

impl<T> Ptr<T> {
    pub(crate) fn new(ptr: NonNull<T>, stamp: Stamp) -> Self {
        Self { ptr, stamp }
    }

    pub(crate) fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// Address of the target.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// The arena that issued this pointer.
    pub fn arena(&self) -> ArenaId {
        self.stamp.arena
    }

    /// Epoch of the issuing arena when this pointer was created.
    pub fn epoch(&self) -> u64 {
        self.stamp.epoch
    }

    /// Whether this pointer came from [`Ptr::leak`].
    pub fn is_native(&self) -> bool {
        self.stamp.arena == ArenaId::NATIVE
    }
}

impl<T: 'static> Ptr<T> {
    /// Leak `value` and point at it. The result never goes stale.
    pub fn leak(value: Box<T>) -> Self {
        Self::new(NonNull::from(Box::leak(value)), Stamp::NATIVE)
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.stamp == other.stamp
    }
}

impl<T> Eq for Ptr<T> {}

impl<T> Hash for Ptr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
        self.stamp.hash(state);
    }
}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr({:#x}, {})", self.addr(), self.stamp)
    }
}

// SAFETY: a Ptr only ever yields `&T`, so sending or sharing it is sound
// whenever `&T` may cross threads.
unsafe impl<T: Sync> Send for Ptr<T> {}
// SAFETY: see `Send`.
unsafe impl<T: Sync> Sync for Ptr<T> {}

// ── Slice ───────────────────────────────────────────────────────

/// A growable array of `T`: `len` initialised elements followed by spare
/// capacity.
///
/// `Slice` is neither `Copy` nor `Clone`: growing it with
/// [`Lac::append`](crate::Lac::append) consumes the old value, so two
/// handles can never write to the same spare capacity.
#[must_use]
pub struct Slice<T> {
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    stamp: Stamp,
}

impl<T> Slice<T> {
    pub(crate) fn new(ptr: NonNull<T>, len: usize, cap: usize, stamp: Stamp) -> Self {
        debug_assert!(len <= cap);
        Self {
            ptr,
            len,
            cap,
            stamp,
        }
    }

    /// An empty array with no backing memory.
    pub fn empty() -> Self {
        Self::new(NonNull::dangling(), 0, 0, Stamp::STATIC)
    }

    pub(crate) fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// Number of initialised elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements that fit without reallocating.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Address of the backing storage.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// The arena that issued this array.
    pub fn arena(&self) -> ArenaId {
        self.stamp.arena
    }

    /// Epoch of the issuing arena when this array was created or grown.
    pub fn epoch(&self) -> u64 {
        self.stamp.epoch
    }
}

impl<T: 'static> Slice<T> {
    /// Leak `values` and refer to them. Capacity equals length.
    pub fn leak(values: Vec<T>) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let leaked: &'static mut [T] = values.leak();
        let len = leaked.len();
        Self::new(NonNull::from(leaked).cast::<T>(), len, len, Stamp::NATIVE)
    }
}

impl<T> Default for Slice<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for Slice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slice({:#x}, len={}, cap={}, {})",
            self.addr(),
            self.len,
            self.cap,
            self.stamp
        )
    }
}

// SAFETY: shared access yields `&[T]`; growth consumes the handle.
unsafe impl<T: Sync> Send for Slice<T> {}
// SAFETY: see `Send`.
unsafe impl<T: Sync> Sync for Slice<T> {}

// ── Str ─────────────────────────────────────────────────────────

/// An immutable UTF-8 string.
#[derive(Clone, Copy)]
#[must_use]
pub struct Str {
    ptr: NonNull<u8>,
    len: usize,
    stamp: Stamp,
}

impl Str {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize, stamp: Stamp) -> Self {
        Self { ptr, len, stamp }
    }

    /// Refer to a string literal. Always valid and never flagged by the
    /// checker.
    pub fn from_static(s: &'static str) -> Self {
        Self::new(NonNull::from(s.as_bytes()).cast::<u8>(), s.len(), Stamp::STATIC)
    }

    /// Leak an owned string and refer to it.
    pub fn leak(s: String) -> Self {
        let leaked: &'static mut str = s.leak();
        let len = leaked.len();
        Self::new(NonNull::from(leaked).cast::<u8>(), len, Stamp::NATIVE)
    }

    pub(crate) fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// The arena that issued this string.
    pub fn arena(&self) -> ArenaId {
        self.stamp.arena
    }
}

impl Default for Str {
    fn default() -> Self {
        Self::from_static("")
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Str({:#x}, len={}, {})", self.addr(), self.len, self.stamp)
    }
}

// SAFETY: string bytes are immutable once written.
unsafe impl Send for Str {}
// SAFETY: see `Send`.
unsafe impl Sync for Str {}

// ── MapRef ──────────────────────────────────────────────────────

/// A reference to a [`MapCell`] kept alive by an arena's map registry.
#[must_use]
pub struct MapRef<K, V> {
    cell: NonNull<MapCell<K, V>>,
    stamp: Stamp,
}

impl<K, V> MapRef<K, V> {
    pub(crate) fn new(cell: NonNull<MapCell<K, V>>, stamp: Stamp) -> Self {
        Self { cell, stamp }
    }

    pub(crate) fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn as_non_null(&self) -> NonNull<MapCell<K, V>> {
        self.cell
    }

    /// Address of the map cell.
    pub fn addr(&self) -> usize {
        self.cell.as_ptr() as usize
    }

    /// The arena that issued this reference.
    pub fn arena(&self) -> ArenaId {
        self.stamp.arena
    }
}

impl<K: 'static, V: 'static> MapRef<K, V> {
    /// Leak a map and refer to it. Never registered with any arena.
    pub fn leak(map: IndexMap<K, V>) -> Self {
        Self::new(
            NonNull::from(Box::leak(Box::new(RwLock::new(map)))),
            Stamp::NATIVE,
        )
    }
}

impl<K, V> Clone for MapRef<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for MapRef<K, V> {}

impl<K, V> fmt::Debug for MapRef<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapRef({:#x}, {})", self.addr(), self.stamp)
    }
}

// SAFETY: the cell is an RwLock, so `&MapCell` may be shared when the
// entries are Send + Sync.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for MapRef<K, V> {}
// SAFETY: see `Send`.
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for MapRef<K, V> {}

// ── FnRef ───────────────────────────────────────────────────────

/// The closure type behind a [`FnRef`].
pub type SharedFn<A, R> = dyn Fn(A) -> R + Send + Sync;

/// A reference to a closure kept alive by an arena's function registry.
#[must_use]
pub struct FnRef<A, R> {
    f: NonNull<SharedFn<A, R>>,
    stamp: Stamp,
    _sig: PhantomData<fn(A) -> R>,
}

impl<A: 'static, R: 'static> FnRef<A, R> {
    pub(crate) fn new(f: NonNull<SharedFn<A, R>>, stamp: Stamp) -> Self {
        Self {
            f,
            stamp,
            _sig: PhantomData,
        }
    }

    /// Leak a closure and refer to it. Never registered with any arena.
    pub fn leak(f: Box<SharedFn<A, R>>) -> Self {
        Self::new(NonNull::from(Box::leak(f)), Stamp::NATIVE)
    }

    pub(crate) fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn as_non_null(&self) -> NonNull<SharedFn<A, R>> {
        self.f
    }

    /// Address of the closure's data.
    pub fn addr(&self) -> usize {
        self.f.as_ptr() as *const () as usize
    }

    /// The arena that issued this reference.
    pub fn arena(&self) -> ArenaId {
        self.stamp.arena
    }
}

impl<A, R> Clone for FnRef<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for FnRef<A, R> {}

impl<A, R> fmt::Debug for FnRef<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FnRef({:#x}, {})",
            self.f.as_ptr() as *const () as usize,
            self.stamp
        )
    }
}

// SAFETY: the closure is Send + Sync.
unsafe impl<A, R> Send for FnRef<A, R> {}
// SAFETY: see `Send`.
unsafe impl<A, R> Sync for FnRef<A, R> {}
