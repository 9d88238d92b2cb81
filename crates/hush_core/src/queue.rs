//! Byte Queues
//!
//! Unbounded FIFO of PCM bytes between a feed and the processing loop.
//! Locking is left to the owner; the pipeline wraps each queue in its own
//! mutex.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ByteQueue {
    bytes: VecDeque<u8>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes at the back
    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend(data);
    }

    /// Remove exactly `count` bytes from the front, or nothing if fewer are queued
    pub fn pop_exact(&mut self, count: usize) -> Option<Vec<u8>> {
        if self.bytes.len() < count {
            return None;
        }
        Some(self.bytes.drain(..count).collect())
    }

    /// Move up to `out.len()` bytes into `out`, returning how many were moved
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.bytes.len());
        let (front, back) = self.bytes.as_slices();
        if count <= front.len() {
            out[..count].copy_from_slice(&front[..count]);
        } else {
            out[..front.len()].copy_from_slice(front);
            out[front.len()..count].copy_from_slice(&back[..count - front.len()]);
        }
        self.bytes.drain(..count);
        count
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
