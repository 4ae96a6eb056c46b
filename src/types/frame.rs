//! Extracted frame representation

use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// One logical, delimited unit of payload extracted from the byte stream.
///
/// This is the fundamental data unit that flows out of the pipeline. The
/// payload is shared via `Arc` so a frame can be fanned out to multiple
/// consumers (plot, console, export) without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame payload with delimiters and checksum trailer stripped
    pub payload: Arc<[u8]>,

    /// Monotonic extraction timestamp in milliseconds
    pub timestamp: u64,

    /// Monotonically increasing counter, starting at 1 per extractor instance
    pub sequence: u64,

    /// Whether the checksum trailer matched (always `true` when no checksum
    /// algorithm is configured)
    pub checksum_valid: bool,
}

impl Frame {
    /// Create a new frame stamped with the current monotonic time.
    pub fn new(payload: Vec<u8>, sequence: u64, checksum_valid: bool) -> Self {
        Self { payload: payload.into(), timestamp: monotonic_ms(), sequence, checksum_valid }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Milliseconds elapsed since the first call in this process.
///
/// Monotonic (never goes backwards), unaffected by wall-clock adjustments.
pub fn monotonic_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
