use std::collections::vec_deque::{self, VecDeque};

use super::buf::Buf;

/// Ordered sequence of buffers; front is the oldest data.
#[derive(Debug, Default)]
pub struct BufChain {
    bufs: VecDeque<Buf>,
}

impl BufChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub fn push_back(&mut self, buf: Buf) {
        self.bufs.push_back(buf);
    }

    pub fn pop_front(&mut self) -> Option<Buf> {
        self.bufs.pop_front()
    }

    pub fn front(&self) -> Option<&Buf> {
        self.bufs.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut Buf> {
        self.bufs.front_mut()
    }

    pub fn back_mut(&mut self) -> Option<&mut Buf> {
        self.bufs.back_mut()
    }

    pub fn get(&self, idx: usize) -> Option<&Buf> {
        self.bufs.get(idx)
    }

    /// Bytes stored across the chain that nobody has consumed yet.
    pub fn total_pending(&self) -> usize {
        self.bufs.iter().map(Buf::pending_len).sum()
    }

    /// Moves every buffer out, leaving the chain empty.
    pub fn take(&mut self) -> BufChain {
        std::mem::take(self)
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Buf> {
        self.bufs.iter()
    }

    pub fn iter_mut(&mut self) -> vec_deque::IterMut<'_, Buf> {
        self.bufs.iter_mut()
    }

    pub fn pop_back(&mut self) -> Option<Buf> {
        self.bufs.pop_back()
    }

    pub(crate) fn as_deque_mut(&mut self) -> &mut VecDeque<Buf> {
        &mut self.bufs
    }
}

impl IntoIterator for BufChain {
    type Item = Buf;
    type IntoIter = vec_deque::IntoIter<Buf>;

    fn into_iter(self) -> Self::IntoIter {
        self.bufs.into_iter()
    }
}

impl FromIterator<Buf> for BufChain {
    fn from_iter<I: IntoIterator<Item = Buf>>(iter: I) -> Self {
        Self {
            bufs: iter.into_iter().collect(),
        }
    }
}
