//! Bounded history of the bytes most recently seen by one direction.

/// Largest LZ77 window deflate can reference, and so the largest useful
/// preset dictionary.
pub const WINDOW_SIZE: usize = 32 * 1024;

/// Keeps the last `capacity` bytes ever written to it.
///
/// After any sequence of writes the contents equal the trailing
/// `min(capacity, total_written)` bytes, in order. The capacity is fixed at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    buf: Vec<u8>,
    capacity: usize,
}

impl SlidingWindow {
    /// An empty window holding at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `data`, discarding the oldest bytes once over capacity.
    pub fn write(&mut self, data: &[u8]) {
        if data.len() >= self.capacity {
            self.buf.clear();
            self.buf
                .extend_from_slice(&data[data.len() - self.capacity..]);
            return;
        }

        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(data);
    }

    /// Current contents, oldest byte first.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum number of bytes retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget all history, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
