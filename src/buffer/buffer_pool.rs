//! Per-request buffer pool.
//!
//! Buffers are carved from large arena blocks so that consecutive allocations
//! sit next to each other in memory, which lets the vector coalescer merge a
//! chain of full buffers into one scatter/gather span without copying.
//! Released buffers go to a bounded free list and are handed out again to
//! any request for a size they can hold.
//!
//! The memory cap applies to live bytes: every carved buffer charges its
//! capacity to the pool until it is dropped, whether it sits in a session,
//! in a task or on the free list. Free buffers are evicted before a request
//! is refused.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, trace};
use parking_lot::Mutex;

use super::buf::{Buf, MemoryCharge};
use super::chain::BufChain;
use crate::common::config::ARENA_BLOCK_SIZE;
use crate::common::exception::{FileResult, IoError};

/// Upper bound on buffers parked on the free list.
const MAX_FREE_BUFFERS: usize = 64;

/// Snapshot of a pool's memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Bytes ever reserved from the allocator for arena blocks.
    pub reserved_bytes: usize,
    /// Capacity of the carved buffers still alive, free ones included.
    pub live_bytes: usize,
    /// Buffers ever carved out of an arena.
    pub carved_buffers: usize,
    /// Buffers waiting on the free list.
    pub free_buffers: usize,
}

#[derive(Debug)]
struct PoolInner {
    arena: BytesMut,
    free: Vec<Buf>,
    reserved_bytes: usize,
    carved_buffers: usize,
}

#[derive(Debug)]
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    live: Arc<AtomicUsize>,
    block_size: usize,
    /// 0 means unlimited.
    limit_bytes: usize,
}

impl BufferPool {
    pub fn new(block_size: usize, limit_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                arena: BytesMut::new(),
                free: Vec::new(),
                reserved_bytes: 0,
                carved_buffers: 0,
            }),
            live: Arc::new(AtomicUsize::new(0)),
            block_size: block_size.max(1),
            limit_bytes,
        }
    }

    pub fn with_limit(limit_bytes: usize) -> Self {
        Self::new(ARENA_BLOCK_SIZE, limit_bytes)
    }

    /// Returns an empty buffer that can hold at least `size` bytes.
    pub fn get(&self, size: usize) -> FileResult<Buf> {
        let mut inner = self.inner.lock();

        if let Some(idx) = inner.free.iter().position(|b| b.capacity() >= size) {
            let mut buf = inner.free.swap_remove(idx);
            buf.reset();
            trace!("reusing free buffer of {} bytes for {}", buf.capacity(), size);
            return Ok(buf);
        }

        if inner.arena.capacity() < size {
            let block = self.block_size.max(size);
            if self.exceeds_limit(block) && !inner.free.is_empty() {
                debug!(
                    "buffer pool under pressure, evicting {} free buffers",
                    inner.free.len()
                );
                inner.free.clear();
            }
            if self.exceeds_limit(block) {
                debug!(
                    "buffer pool limit reached: live {} + {} > {}",
                    self.live_bytes(),
                    block,
                    self.limit_bytes
                );
                return Err(IoError::OutOfMemory);
            }

            inner.arena = BytesMut::with_capacity(block);
            inner.reserved_bytes += block;
            debug!("buffer pool reserved new arena block of {} bytes", block);
        }

        let rest = inner.arena.split_off(size);
        let mem = std::mem::replace(&mut inner.arena, rest);
        inner.carved_buffers += 1;

        Ok(Buf::charged(mem, MemoryCharge::new(&self.live, size)))
    }

    fn exceeds_limit(&self, block: usize) -> bool {
        self.limit_bytes != 0 && self.live_bytes() + block > self.limit_bytes
    }

    fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Returns a buffer to the free list. A full list keeps the larger
    /// buffers; whichever loses is dropped and stops counting as live.
    pub fn put(&self, mut buf: Buf) {
        buf.reset();
        if buf.capacity() == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.free.len() < MAX_FREE_BUFFERS {
            inner.free.push(buf);
            return;
        }

        let smallest = inner
            .free
            .iter()
            .enumerate()
            .min_by_key(|(_, free)| free.capacity())
            .map(|(idx, free)| (idx, free.capacity()));
        if let Some((idx, capacity)) = smallest {
            if capacity < buf.capacity() {
                inner.free[idx] = buf;
            }
        }
    }

    pub fn put_chain(&self, chain: BufChain) {
        for buf in chain {
            self.put(buf);
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        BufferPoolStats {
            reserved_bytes: inner.reserved_bytes,
            live_bytes: self.live_bytes(),
            carved_buffers: inner.carved_buffers,
            free_buffers: inner.free.len(),
        }
    }
}
