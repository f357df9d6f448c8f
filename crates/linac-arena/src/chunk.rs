//! Chunks and the per-arena chunk list.
//!
//! A [`Chunk`] is one contiguous [`RawBuffer`] with an atomic bump cursor.
//! The cursor supports two access modes:
//!
//! - **Exclusive** ([`Chunk::bump`]): plain relaxed load and store, used
//!   while exactly one handle to the owning arena exists.
//! - **Shared** ([`Chunk::try_bump_shared`]): a single compare-and-swap
//!   attempt, retried by the caller on contention.
//!
//! [`ChunkList`] tracks every chunk an arena has installed since its last
//! reset. Chunks are referenced by raw pointer while published so that
//! concurrent readers never observe a `Box` being moved.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::raw::{align_up, RawBuffer};

/// Outcome of one shared-mode bump attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Bump {
    /// The range starting at this address now belongs to the caller.
    Done(NonNull<u8>),
    /// Another thread moved the cursor first; retry.
    Contended,
    /// Not enough room left in this chunk.
    Full,
}

/// A contiguous block of arena memory with a bump cursor.
pub struct Chunk {
    buf: RawBuffer,
    /// Bytes handed out so far. Always a multiple of the word size.
    used: AtomicUsize,
}

impl Chunk {
    /// Allocate a chunk with at least `capacity` bytes (word-aligned).
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: RawBuffer::new(capacity),
            used: AtomicUsize::new(0),
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes handed out since the last truncate.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Base address of the chunk's memory.
    pub fn base_addr(&self) -> usize {
        self.buf.base_addr()
    }

    /// Whether `addr` lies anywhere inside this chunk's block.
    pub fn contains(&self, addr: usize) -> bool {
        self.buf.contains(addr)
    }

    /// Exclusive-mode bump. `aligned` must already be word-rounded.
    ///
    /// The caller must be the only party allocating from this chunk; the
    /// cursor is read and written without a read-modify-write.
    pub(crate) fn bump(&self, aligned: usize) -> Option<NonNull<u8>> {
        debug_assert_eq!(align_up(aligned), Some(aligned));
        let used = self.used.load(Ordering::Relaxed);
        if aligned > self.capacity() - used {
            return None;
        }
        self.used.store(used + aligned, Ordering::Relaxed);
        Some(self.buf.at(used))
    }

    /// Shared-mode bump: one CAS attempt on the cursor.
    pub(crate) fn try_bump_shared(&self, aligned: usize) -> Bump {
        debug_assert_eq!(align_up(aligned), Some(aligned));
        let used = self.used.load(Ordering::Acquire);
        if aligned > self.capacity() - used {
            return Bump::Full;
        }
        match self.used.compare_exchange_weak(
            used,
            used + aligned,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => Bump::Done(self.buf.at(used)),
            Err(_) => Bump::Contended,
        }
    }

    /// Rewind the cursor to zero. Memory is not cleared.
    pub(crate) fn truncate(&mut self) {
        *self.used.get_mut() = 0;
    }

    /// Overwrite every handed-out byte with `byte`.
    ///
    /// # Safety
    ///
    /// No reference into this chunk may be live.
    pub(crate) unsafe fn poison(&self, byte: u8) {
        let used = self.used();
        // SAFETY: `used <= capacity` and the caller guarantees exclusivity.
        unsafe { self.buf.fill(0, used, byte) };
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}

/// Every chunk installed in an arena since its last reset.
///
/// Published chunks are held as raw pointers obtained from
/// `Box::into_raw`; they are turned back into boxes only by
/// [`ChunkList::drain`], which requires `&mut self`.
#[derive(Default)]
pub(crate) struct ChunkList {
    chunks: Vec<NonNull<Chunk>>,
}

// SAFETY: the list uniquely owns its chunks (each pointer came from
// `Box::into_raw` and appears once). `Chunk` is itself Send + Sync.
unsafe impl Send for ChunkList {}
// SAFETY: shared access only yields `&Chunk`, which is Sync.
unsafe impl Sync for ChunkList {}

impl ChunkList {
    /// Take ownership of an already-published chunk pointer.
    ///
    /// # Safety
    ///
    /// `chunk` must come from `Box::into_raw` and must not be owned by
    /// anything else.
    pub(crate) unsafe fn adopt(&mut self, chunk: NonNull<Chunk>) {
        self.chunks.push(chunk);
    }

    /// Take ownership of a boxed chunk and return its stable address.
    pub(crate) fn push(&mut self, chunk: Box<Chunk>) -> NonNull<Chunk> {
        let ptr = NonNull::from(Box::leak(chunk));
        self.chunks.push(ptr);
        ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Chunk> + '_ {
        // SAFETY: every pointer is owned by this list and stays valid until
        // `drain` or `drop`, both of which need `&mut self`.
        self.chunks.iter().map(|p| unsafe { p.as_ref() })
    }

    /// Whether `addr` falls inside any tracked chunk.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.iter().any(|c| c.contains(addr))
    }

    /// Hand every chunk back as a `Box`, leaving the list empty.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Box<Chunk>> + '_ {
        // SAFETY: `&mut self` proves no `&Chunk` from `iter` is alive, and
        // each pointer originated from `Box::leak`/`Box::into_raw`.
        self.chunks
            .drain(..)
            .map(|p| unsafe { Box::from_raw(p.as_ptr()) })
    }
}

impl Drop for ChunkList {
    fn drop(&mut self) {
        self.drain().for_each(drop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::WORD;

    #[test]
    fn sequential_bumps_do_not_overlap() {
        let chunk = Chunk::new(64);
        let a = chunk.bump(WORD).unwrap().as_ptr() as usize;
        let b = chunk.bump(2 * WORD).unwrap().as_ptr() as usize;
        assert_eq!(b - a, WORD);
        assert_eq!(chunk.used(), 3 * WORD);
        assert_eq!(a, chunk.base_addr());
    }

    #[test]
    fn bump_fails_when_full() {
        let chunk = Chunk::new(2 * WORD);
        assert!(chunk.bump(2 * WORD).is_some());
        assert!(chunk.bump(WORD).is_none());
        assert_eq!(chunk.remaining(), 0);
    }

    #[test]
    fn shared_bump_reports_full() {
        let chunk = Chunk::new(WORD);
        assert!(matches!(chunk.try_bump_shared(WORD), Bump::Done(_) | Bump::Contended));
        // A single-threaded weak CAS can fail spuriously; loop until settled.
        while chunk.used() == 0 {
            let _ = chunk.try_bump_shared(WORD);
        }
        assert_eq!(chunk.try_bump_shared(WORD), Bump::Full);
    }

    #[test]
    fn truncate_rewinds_cursor() {
        let mut chunk = Chunk::new(64);
        let first = chunk.bump(WORD).unwrap();
        chunk.truncate();
        assert_eq!(chunk.used(), 0);
        assert_eq!(chunk.bump(WORD).unwrap(), first);
    }

    #[test]
    fn list_tracks_and_drains() {
        let mut list = ChunkList::default();
        let addr = list.push(Box::new(Chunk::new(64)));
        // SAFETY: the list owns the chunk and nothing else references it.
        let base = unsafe { addr.as_ref() }.base_addr();
        assert_eq!(list.len(), 1);
        assert!(list.contains(base + 8));
        let drained: Vec<_> = list.drain().collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].base_addr(), base);
        assert_eq!(list.len(), 0);
    }
}
