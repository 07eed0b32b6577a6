//! Bounded receive buffer between the USB reader thread and `read_data`.

use std::collections::VecDeque;

/// Default capacity, in bytes.
pub const RING_CAPACITY: usize = 4096;

/// FIFO byte buffer with a hard capacity. Bytes arriving while full are dropped.
#[derive(Debug)]
pub struct RingBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
    dropped: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append as much of `data` as fits. Returns the number of bytes stored.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let room = self.capacity - self.bytes.len();
        let take = data.len().min(room);
        self.bytes.extend(&data[..take]);
        self.dropped += (data.len() - take) as u64;
        take
    }

    /// Move up to `out.len()` buffered bytes into `out`, oldest first.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.bytes.len());
        for (slot, byte) in out.iter_mut().zip(self.bytes.drain(..n)) {
            *slot = byte;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Total bytes discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let mut ring = RingBuffer::new(8);
        ring.push(&[1, 2, 3]);
        ring.push(&[4]);
        let mut out = [0u8; 8];
        assert_eq!(ring.drain_into(&mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn partial_drain_leaves_remainder() {
        let mut ring = RingBuffer::new(8);
        ring.push(&[1, 2, 3, 4, 5]);
        let mut out = [0u8; 2];
        assert_eq!(ring.drain_into(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(ring.len(), 3);
        let mut rest = [0u8; 8];
        assert_eq!(ring.drain_into(&mut rest), 3);
        assert_eq!(&rest[..3], &[3, 4, 5]);
    }

    #[test]
    fn overflow_drops_newest_bytes() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.push(&[1, 2, 3]), 3);
        assert_eq!(ring.push(&[4, 5, 6]), 1);
        assert_eq!(ring.dropped(), 2);
        let mut out = [0u8; 4];
        ring.drain_into(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn wraps_after_draining() {
        let mut ring = RingBuffer::new(4);
        let mut out = [0u8; 3];
        for round in 0..10u8 {
            ring.push(&[round, round + 1, round + 2]);
            assert_eq!(ring.drain_into(&mut out), 3);
            assert_eq!(out, [round, round + 1, round + 2]);
        }
    }

    #[test]
    fn empty_drain_returns_zero() {
        let mut ring = RingBuffer::default();
        let mut out = [0u8; 16];
        assert_eq!(ring.drain_into(&mut out), 0);
    }
}
