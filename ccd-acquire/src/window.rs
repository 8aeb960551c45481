//! Bounded byte window used while resynchronizing on the serial stream.

use std::collections::VecDeque;

/// A fixed-capacity FIFO of bytes that drops the oldest byte when full.
///
/// The serial decoder appends incoming bytes at the back and consumes
/// records or single slipped bytes from the front, so it never buffers more
/// than `capacity` bytes no matter how garbled the stream is.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteWindow {
    data: VecDeque<u8>,
    capacity: usize,
}

impl ByteWindow {
    /// Create a window holding at most `capacity` bytes.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ByteWindow capacity must be > 0");
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a byte, returning the byte evicted from the front if the window was full.
    pub fn push(&mut self, byte: u8) -> Option<u8> {
        let evicted = if self.data.len() >= self.capacity {
            self.data.pop_front()
        } else {
            None
        };
        self.data.push_back(byte);
        evicted
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Oldest byte, if any.
    pub fn front(&self) -> Option<u8> {
        self.data.front().copied()
    }

    /// First `N` bytes, if the window holds at least that many.
    pub fn peek<const N: usize>(&self) -> Option<[u8; N]> {
        if self.data.len() < N {
            return None;
        }
        let mut out = [0u8; N];
        for (slot, byte) in out.iter_mut().zip(self.data.iter()) {
            *slot = *byte;
        }
        Some(out)
    }

    /// Drop one byte from the front.
    pub fn slip(&mut self) -> Option<u8> {
        self.data.pop_front()
    }

    /// Drop `count` bytes from the front (fewer if the window is shorter).
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.drain(..count);
    }
}
