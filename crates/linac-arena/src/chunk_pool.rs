//! Process-wide recycling of nominal-size chunks.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::chunk::Chunk;
use crate::pool::Pool;

/// A pool of chunks of one nominal size.
///
/// Requests that do not fit a nominal chunk get a standalone chunk sized
/// to the request. Standalone chunks are never pooled: [`put`](Self::put)
/// simply frees them.
pub struct ChunkPool {
    chunk_size: usize,
    pool: Pool<Box<Chunk>>,
    standalone: AtomicUsize,
}

impl ChunkPool {
    /// Create a pool of `chunk_size`-byte chunks holding at most `max` idle.
    pub fn new(chunk_size: usize, max: usize) -> Self {
        Self {
            chunk_size,
            pool: Pool::new("chunk", max, move || Box::new(Chunk::new(chunk_size)))
                .with_equality(|a, b| a.base_addr() == b.base_addr()),
            standalone: AtomicUsize::new(0),
        }
    }

    /// Nominal chunk capacity in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// A chunk with room for at least `aligned` bytes.
    pub fn get(&self, aligned: usize) -> Box<Chunk> {
        if aligned > self.chunk_size {
            self.standalone.fetch_add(1, Ordering::Relaxed);
            debug!(
                bytes = aligned,
                chunk_size = self.chunk_size,
                "allocating standalone chunk for oversized request"
            );
            return Box::new(Chunk::new(aligned));
        }
        self.pool.get()
    }

    /// Return a chunk. Nominal chunks are rewound and pooled; others are freed.
    pub fn put(&self, mut chunk: Box<Chunk>) {
        if chunk.capacity() != self.chunk_size {
            trace!(bytes = chunk.capacity(), "freeing standalone chunk");
            return;
        }
        chunk.truncate();
        self.pool.put(chunk);
    }

    /// Pre-build up to `n` nominal chunks. Returns how many were added.
    pub fn reserve(&self, n: usize) -> usize {
        self.pool.reserve(n)
    }

    /// Free every idle chunk.
    pub fn clear(&self) {
        self.pool.clear();
    }

    /// Idle chunk count.
    pub fn idle(&self) -> usize {
        self.pool.len()
    }

    /// Total requests served from the pool (excluding standalone chunks).
    pub fn gets(&self) -> usize {
        self.pool.gets()
    }

    /// Nominal chunks ever built.
    pub fn created(&self) -> usize {
        self.pool.created()
    }

    /// Standalone chunks ever built.
    pub fn standalone(&self) -> usize {
        self.standalone.load(Ordering::Relaxed)
    }

    pub(crate) fn set_debug(&self, on: bool) {
        self.pool.set_debug(on);
    }
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("chunk_size", &self.chunk_size)
            .field("pool", &self.pool)
            .field("standalone", &self.standalone())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_chunks_are_recycled() {
        let pool = ChunkPool::new(1024, 4);
        let chunk = pool.get(64);
        let base = chunk.base_addr();
        assert_eq!(chunk.capacity(), 1024);
        pool.put(chunk);
        let again = pool.get(8);
        assert_eq!(again.base_addr(), base);
        assert_eq!(again.used(), 0);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn returned_chunks_are_rewound() {
        let pool = ChunkPool::new(1024, 4);
        let chunk = pool.get(64);
        chunk.bump(64).unwrap();
        pool.put(chunk);
        assert_eq!(pool.get(64).used(), 0);
    }

    #[test]
    fn oversized_request_gets_standalone_chunk() {
        let pool = ChunkPool::new(1024, 4);
        let big = pool.get(4096);
        assert_eq!(big.capacity(), 4096);
        assert_eq!(pool.standalone(), 1);
        pool.put(big);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn reserve_prebuilds_chunks() {
        let pool = ChunkPool::new(256, 16);
        assert_eq!(pool.reserve(10), 10);
        assert_eq!(pool.idle(), 10);
        pool.clear();
        assert_eq!(pool.idle(), 0);
    }
}
