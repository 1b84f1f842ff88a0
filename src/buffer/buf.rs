//! Fixed-capacity byte buffer used for both write caching and read look-ahead.

use bytes::BytesMut;
use std::io::{self, Read};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bytes a pooled buffer holds against its pool's live total.
///
/// Released when dropped, wherever the buffer ends up.
#[derive(Debug)]
pub(crate) struct MemoryCharge {
    live: Arc<AtomicUsize>,
    bytes: usize,
}

impl MemoryCharge {
    pub(crate) fn new(live: &Arc<AtomicUsize>, bytes: usize) -> Self {
        live.fetch_add(bytes, Ordering::AcqRel);
        Self {
            live: Arc::clone(live),
            bytes,
        }
    }

    fn merge(&mut self, mut other: MemoryCharge) {
        // Views from different pools are never adjacent.
        if Arc::ptr_eq(&self.live, &other.live) {
            self.bytes += mem::take(&mut other.bytes);
        }
    }
}

impl Drop for MemoryCharge {
    fn drop(&mut self) {
        self.live.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// A fixed-capacity buffer with a consume cursor.
///
/// Bytes live in `mem[..len]`; `pos` marks the first byte not yet consumed
/// by a read filter (write buffers never advance it). The capacity never
/// grows once the buffer has been carved from its arena.
#[derive(Debug)]
pub struct Buf {
    mem: BytesMut,
    pos: usize,
    charge: Option<MemoryCharge>,
}

impl Buf {
    pub(crate) fn from_mem(mem: BytesMut) -> Self {
        Self {
            mem,
            pos: 0,
            charge: None,
        }
    }

    pub(crate) fn charged(mem: BytesMut, charge: MemoryCharge) -> Self {
        Self {
            mem,
            pos: 0,
            charge: Some(charge),
        }
    }

    /// Allocates a standalone buffer outside any pool.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_mem(BytesMut::with_capacity(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.mem.capacity()
    }

    /// Number of bytes stored, consumed or not.
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Free space left at the tail.
    pub fn room(&self) -> usize {
        self.mem.capacity() - self.mem.len()
    }

    pub fn is_full(&self) -> bool {
        self.room() == 0
    }

    /// Bytes stored but not consumed yet.
    pub fn pending(&self) -> &[u8] {
        &self.mem[self.pos..]
    }

    pub fn pending_len(&self) -> usize {
        self.mem.len() - self.pos
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.room());
        self.mem.extend_from_slice(&data[..n]);
        n
    }

    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.pending_len());
        self.pos = (self.pos + n).min(self.mem.len());
    }

    /// Fills the free tail with one `read` call, retrying on EINTR.
    ///
    /// Returns the number of bytes added; 0 means end of file (or a full
    /// buffer, which callers never pass in).
    pub fn fill_from<R: Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let start = self.mem.len();
        let end = self.mem.capacity();
        if start == end {
            return Ok(0);
        }

        // Stays within capacity, so the arena slot is never reallocated.
        self.mem.resize(end, 0);
        let result = loop {
            match reader.read(&mut self.mem[start..end]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let n = *result.as_ref().unwrap_or(&0);
        self.mem.truncate(start + n);
        result
    }

    /// Empties the buffer while keeping its capacity.
    pub fn reset(&mut self) {
        self.mem.clear();
        self.pos = 0;
    }

    /// True when `next`'s data starts exactly where this buffer's data ends.
    pub(crate) fn is_adjacent_to(&self, next: &Buf) -> bool {
        if next.pos != 0 || next.mem.is_empty() || self.mem.is_empty() {
            return false;
        }
        self.mem.as_ptr() as usize + self.mem.len() == next.mem.as_ptr() as usize
    }

    /// Merges an adjacent buffer into this one.
    ///
    /// O(1) when both views come from the same arena block.
    pub(crate) fn absorb(&mut self, next: Buf) {
        let Buf { mem, charge, .. } = next;
        self.mem.unsplit(mem);
        match (self.charge.as_mut(), charge) {
            (Some(own), Some(other)) => own.merge(other),
            (None, Some(other)) => self.charge = Some(other),
            (_, None) => {}
        }
    }
}
