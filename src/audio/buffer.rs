//! Per-talkgroup pending audio buffer
//!
//! Bytes are appended by the ingest loop and drained from the front, one
//! quantum at a time, by the mix loop. The buffer only ever holds whole
//! 16-bit samples and is capped: when a producer outruns the mixer the oldest
//! samples are discarded.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::SAMPLE_WIDTH;

/// FIFO of raw s16le mono samples
#[derive(Debug)]
pub struct SampleBuffer {
    data: BytesMut,
    /// Cap in bytes, a multiple of `SAMPLE_WIDTH`
    capacity: usize,
    /// Bytes discarded because of the cap
    overflow_bytes: u64,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::new(),
            capacity: capacity - capacity % SAMPLE_WIDTH,
            overflow_bytes: 0,
        }
    }

    /// Append a payload. A trailing partial sample is dropped.
    /// Returns the number of old bytes discarded to stay under the cap.
    pub fn push(&mut self, payload: &[u8]) -> usize {
        let whole = payload.len() - payload.len() % SAMPLE_WIDTH;
        self.data.extend_from_slice(&payload[..whole]);

        let excess = self.data.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.data.advance(excess);
            self.overflow_bytes += excess as u64;
        }
        excess
    }

    /// Take exactly `len` bytes from the front, or nothing if fewer are buffered
    pub fn drain(&mut self, len: usize) -> Option<Bytes> {
        if self.data.len() < len {
            return None;
        }
        Some(self.data.split_to(len).freeze())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow_bytes(&self) -> u64 {
        self.overflow_bytes
    }
}
