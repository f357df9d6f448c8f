//! Low-level primitives for arena memory operations.
//!
//! [`RawBuffer`] owns one word-aligned block obtained from the global
//! allocator. It is the only type in the crate that talks to
//! `std::alloc` directly. Every `unsafe` block below carries a
//! `// SAFETY:` comment.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

/// Machine word size in bytes. Every address handed out by an arena is a
/// multiple of this.
pub const WORD: usize = std::mem::size_of::<usize>();

/// Round `size` up to the next multiple of [`WORD`].
///
/// Zero-sized requests occupy one word so that every allocation owns a
/// distinct address inside its chunk. Returns `None` on overflow.
pub(crate) const fn align_up(size: usize) -> Option<usize> {
    let size = if size == 0 { WORD } else { size };
    match size.checked_add(WORD - 1) {
        Some(v) => Some(v & !(WORD - 1)),
        None => None,
    }
}

/// An owned, word-aligned, uninitialised heap block.
///
/// The buffer never hands out references; callers receive raw addresses
/// and are responsible for coordinating access (the chunk cursor does
/// that for arena memory).
pub(crate) struct RawBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
}

// SAFETY: RawBuffer is a uniquely owned heap allocation. All reads and
// writes go through raw pointers whose ranges are handed out exclusively
// by the owning chunk's atomic cursor.
unsafe impl Send for RawBuffer {}
// SAFETY: see `Send`; `&RawBuffer` only exposes the base address and
// capacity, plus the `unsafe` fill/copy helpers with their own contracts.
unsafe impl Sync for RawBuffer {}

impl RawBuffer {
    /// Allocate a buffer of `capacity` bytes (rounded up to one word).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` overflows `isize` once aligned. Aborts through
    /// [`alloc::handle_alloc_error`] if the allocator fails.
    pub(crate) fn new(capacity: usize) -> Self {
        let layout = Self::layout(capacity);
        // SAFETY: `layout` has a non-zero size (at least one word).
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        Self {
            ptr,
            capacity: layout.size(),
        }
    }

    fn layout(capacity: usize) -> Layout {
        let size = align_up(capacity).unwrap_or_else(|| {
            panic!("buffer capacity {capacity} overflows the address space")
        });
        match Layout::from_size_align(size, WORD) {
            Ok(layout) => layout,
            Err(_) => panic!("buffer capacity {capacity} exceeds isize::MAX"),
        }
    }

    /// Capacity in bytes.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Base address of the block.
    pub(crate) fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Whether `addr` falls inside `[base, base + capacity)`.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        let base = self.base_addr();
        addr >= base && addr - base < self.capacity
    }

    /// Address of the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset >= capacity`.
    pub(crate) fn at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.capacity,
            "offset {offset} outside buffer of {} bytes",
            self.capacity
        );
        // SAFETY: `offset` is strictly inside the allocation, so the result
        // is in bounds and non-null.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }

    /// Overwrite `len` bytes starting at `offset` with `byte`.
    ///
    /// # Safety
    ///
    /// `offset + len <= capacity`, and no reference into the range may be
    /// live while it is overwritten.
    pub(crate) unsafe fn fill(&self, offset: usize, len: usize, byte: u8) {
        debug_assert!(offset + len <= self.capacity);
        // SAFETY: the caller guarantees bounds and exclusivity.
        unsafe { ptr::write_bytes(self.ptr.as_ptr().add(offset), byte, len) };
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        let layout = Self::layout(self.capacity);
        // SAFETY: `ptr` was returned by `alloc::alloc` with this exact layout
        // (capacity is stored post-alignment, so the layout is identical).
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

/// Zero `len` bytes at `dst`.
///
/// # Safety
///
/// `dst..dst + len` must be a writable range exclusively reserved for the
/// caller.
pub(crate) unsafe fn zero(dst: NonNull<u8>, len: usize) {
    // SAFETY: forwarded from the caller.
    unsafe { ptr::write_bytes(dst.as_ptr(), 0, len) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_word() {
        assert_eq!(align_up(1), Some(WORD));
        assert_eq!(align_up(WORD), Some(WORD));
        assert_eq!(align_up(WORD + 1), Some(2 * WORD));
    }

    #[test]
    fn zero_size_takes_one_word() {
        assert_eq!(align_up(0), Some(WORD));
    }

    #[test]
    fn align_up_overflow_is_none() {
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn buffer_is_word_aligned() {
        let buf = RawBuffer::new(100);
        assert_eq!(buf.base_addr() % WORD, 0);
        assert_eq!(buf.capacity(), align_up(100).unwrap());
    }

    #[test]
    fn contains_covers_exactly_the_block() {
        let buf = RawBuffer::new(64);
        let base = buf.base_addr();
        assert!(buf.contains(base));
        assert!(buf.contains(base + 63));
        assert!(!buf.contains(base + 64));
        assert!(!buf.contains(base.wrapping_sub(1)));
    }

    #[test]
    #[should_panic(expected = "outside buffer")]
    fn at_rejects_out_of_range_offset() {
        let buf = RawBuffer::new(16);
        let _ = buf.at(16);
    }
}
