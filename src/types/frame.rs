//! Encoded frame type that flows from ingress to the pipeline

use bytes::Bytes;
use std::time::Instant;

/// One encoded image exactly as received from the wire.
///
/// This is the fundamental data unit that flows through a session. It is
/// deliberately not `Clone`: a frame is owned by the ingress task, then by the
/// freshness queue, then by the pipeline task, and is never shared.
#[derive(Debug)]
pub struct Frame {
    /// Encoded payload (JPEG, PNG, ...)
    data: Bytes,

    /// Per-session arrival sequence, starting at 1
    sequence: u64,

    /// When ingress read the message off the connection
    received_at: Instant,
}

impl Frame {
    /// Create a new frame stamped with the current time
    pub fn new(data: impl Into<Bytes>, sequence: u64) -> Self {
        Self::with_timestamp(data, sequence, Instant::now())
    }

    /// Create a new frame with an explicit arrival time
    pub fn with_timestamp(data: impl Into<Bytes>, sequence: u64, received_at: Instant) -> Self {
        Self { data: data.into(), sequence, received_at }
    }

    /// Encoded payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Arrival sequence number, unique within a session
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Arrival timestamp
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length payload
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the frame, returning its payload
    pub fn into_data(self) -> Bytes {
        self.data
    }
}
