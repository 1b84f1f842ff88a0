//! Scatter/gather span building for chain writes.
//!
//! A write chain is turned into `IoSlice`s in two steps. First,
//! [`coalesce_adjacent`] folds every buffer whose data starts exactly where
//! its predecessor's data ends into that predecessor, so one span covers
//! both. Then [`chain_to_iovec`] walks the chain from a start index and
//! emits at most `max` spans, returning where the next syscall must resume.

use std::io::IoSlice;

use super::buf::Buf;
use super::chain::BufChain;

/// Spans for a single vectored write.
#[derive(Debug, Default)]
pub struct IoVec<'a> {
    slices: Vec<IoSlice<'a>>,
    size: usize,
}

impl<'a> IoVec<'a> {
    pub fn slices(&self) -> &[IoSlice<'a>] {
        &self.slices
    }

    /// Total bytes covered by all spans.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Merges memory-contiguous neighbours in place. Returns the number of merges.
pub fn coalesce_adjacent(chain: &mut BufChain) -> usize {
    let bufs = chain.as_deque_mut();
    if bufs.len() < 2 {
        return 0;
    }

    let mut merged = 0;
    let mut out: Vec<Buf> = Vec::with_capacity(bufs.len());
    for buf in bufs.drain(..) {
        match out.last_mut() {
            Some(prev) if prev.is_adjacent_to(&buf) => {
                prev.absorb(buf);
                merged += 1;
            }
            _ => out.push(buf),
        }
    }
    bufs.extend(out);
    merged
}

/// Builds up to `max` spans from `chain[start..]`, skipping empty buffers.
///
/// Returns the spans and the index of the first node left undispatched,
/// which equals `chain.len()` once everything has been covered.
pub fn chain_to_iovec(chain: &BufChain, start: usize, max: usize) -> (IoVec<'_>, usize) {
    let mut vec = IoVec::default();
    let mut idx = start;

    while let Some(buf) = chain.get(idx) {
        let data = buf.pending();
        if !data.is_empty() {
            if vec.slices.len() == max {
                break;
            }
            vec.size += data.len();
            vec.slices.push(IoSlice::new(data));
        }
        idx += 1;
    }

    (vec, idx)
}
