//! Communication statistics

use serde::{Deserialize, Serialize};

/// Byte/frame/error counters for one connection.
///
/// Counters are mutated only by the component that owns the corresponding
/// event: the transport layer accounts bytes, the extractor accounts frames,
/// the orchestrator accounts errors and reconnections. Aggregated snapshots
/// are produced with [`CommunicationStats::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationStats {
    /// Total bytes received from the transport
    pub bytes_received: u64,
    /// Total bytes written to the transport
    pub bytes_sent: u64,
    /// Frames successfully extracted
    pub frames_received: u64,
    /// Frames written out by the caller
    pub frames_sent: u64,
    /// Transport and extraction error count
    pub errors: u64,
    /// Completed Reconnecting -> Connected cycles
    pub reconnections: u64,
    /// Milliseconds since the connection opened (or since the last reset)
    pub uptime_ms: u64,
    /// Monotonic timestamp of the last byte or frame activity
    pub last_activity_ms: u64,
}

impl CommunicationStats {
    /// Zero all counters. The owning component re-bases its uptime clock to
    /// "now" alongside this call.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold another snapshot into this one, summing counters and keeping the
    /// most recent activity timestamp. Uptime is taken from `self` (the
    /// aggregating side owns the connection clock).
    pub fn merge(&mut self, other: &CommunicationStats) {
        self.bytes_received += other.bytes_received;
        self.bytes_sent += other.bytes_sent;
        self.frames_received += other.frames_received;
        self.frames_sent += other.frames_sent;
        self.errors += other.errors;
        self.reconnections += other.reconnections;
        self.last_activity_ms = self.last_activity_ms.max(other.last_activity_ms);
    }
}
