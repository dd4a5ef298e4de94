//! The growable byte arena the writer loop serializes frames
//! into before handing a contiguous span to the transport.
//!
//! Built on `bytes::BytesMut`'s head/tail cursor model; `OutgoingBuffer`
//! adds a pool-return contract on top (`clear_and_return` makes an empty
//! buffer behave as unallocated again).

use bytes::BytesMut;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 16 * 1024;

/// A single rented chunk of outgoing bytes. `head` marks what the writer
/// has already flushed to the transport; `tail` marks the end of what has
/// been serialized so far. `discard` and `commit` only ever move forward.
#[derive(Debug, Default)]
pub struct OutgoingBuffer {
    bytes: BytesMut,
}

impl OutgoingBuffer {
    pub fn new() -> Self {
        OutgoingBuffer {
            bytes: BytesMut::new(),
        }
    }

    /// Ensures at least `n` more bytes can be written without reallocating
    /// mid-frame.
    pub fn ensure_available(&mut self, n: usize) {
        if self.bytes.capacity() - self.bytes.len() < n {
            self.bytes.reserve(n);
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The unflushed span, ready to hand to `transport.write`.
    pub fn active_span(&self) -> &[u8] {
        &self.bytes
    }

    /// Advances past `n` already-written bytes, e.g. after a successful
    /// transport write.
    pub fn discard(&mut self, n: usize) {
        let _ = self.bytes.split_to(n.min(self.bytes.len()));
    }

    /// Returns a mutable handle frame encoders can `put_*` directly into.
    pub fn writer(&mut self) -> &mut BytesMut {
        &mut self.bytes
    }

    /// Once empty, behave as unallocated until the next `ensure_available`
    /// — this is what lets the connection idle without holding a 16KiB+
    /// buffer alive.
    pub fn clear_and_return(&mut self, pool: &BufferPool) {
        if self.bytes.is_empty() {
            let spare = std::mem::take(&mut self.bytes);
            pool.put(spare);
        }
    }
}

/// A tiny free-list so the writer loop doesn't pay a fresh allocation every
/// time a connection goes idle and wakes back up. Bounded so a burst of
/// many connections churning through buffers doesn't let the pool grow
/// without limit.
pub struct BufferPool {
    capacity_hint: usize,
    free: parking_lot::Mutex<VecDeque<BytesMut>>,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            capacity_hint: DEFAULT_CAPACITY,
            free: parking_lot::Mutex::new(VecDeque::new()),
            max_pooled: 32,
        }
    }

    pub fn rent(&self) -> OutgoingBuffer {
        let mut bytes = self.free.lock().pop_front().unwrap_or_default();
        if bytes.capacity() < self.capacity_hint {
            bytes.reserve(self.capacity_hint - bytes.capacity());
        }
        OutgoingBuffer { bytes }
    }

    fn put(&self, bytes: BytesMut) {
        if bytes.capacity() == 0 {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push_back(bytes);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_then_empty_allows_return_to_pool() {
        let pool = BufferPool::new();
        let mut buf = pool.rent();
        buf.writer().extend_from_slice(b"hello");
        assert_eq!(buf.len(), 5);

        buf.discard(5);
        assert!(buf.is_empty());
        buf.clear_and_return(&pool);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn pool_reuses_rented_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.rent();
        buf.writer().extend_from_slice(&[0u8; 64]);
        buf.discard(64);
        buf.clear_and_return(&pool);

        let buf2 = pool.rent();
        assert!(buf2.is_empty());
    }
}
