//! Inbound byte coalescing window for transport drivers.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::types::{CommunicationStats, monotonic_ms};

use super::TransportEvent;

/// Default coalescing window: 8 KiB.
pub const DEFAULT_WINDOW_CAPACITY: usize = 8192;

/// Event-channel depth. Slow consumers lose batches rather than blocking the
/// driver's read loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-connection byte aggregator sitting between a raw transport and the
/// extraction layer.
///
/// Every inbound chunk is appended to a fixed-size window; once the fill
/// level crosses 80% of capacity the window is flushed as a single
/// [`TransportEvent::Data`] batch, bounding both per-driver memory and
/// delivery latency. A chunk larger than the whole window bypasses buffering
/// and is emitted directly.
///
/// The buffer also owns the driver's [`CommunicationStats`]: bytes received
/// and sent, error counts, uptime and last-activity timestamps.
pub struct TransportBuffer {
    window: Vec<u8>,
    position: usize,
    flush_threshold: usize,
    events: mpsc::Sender<TransportEvent>,
    stats: CommunicationStats,
    opened_at: Instant,
    dropped_events: u64,
}

impl TransportBuffer {
    /// Create a window of `capacity` bytes plus the receiving half of its
    /// event channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransportEvent>) {
        assert!(capacity > 0, "transport window capacity must be non-zero");
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let buffer = Self {
            window: vec![0; capacity],
            position: 0,
            // 80% fill triggers an immediate flush
            flush_threshold: capacity * 4 / 5,
            events,
            stats: CommunicationStats::default(),
            opened_at: Instant::now(),
            dropped_events: 0,
        };
        (buffer, receiver)
    }

    /// Create a window with the default 8 KiB capacity.
    pub fn with_default_capacity() -> (Self, mpsc::Receiver<TransportEvent>) {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }

    /// Window capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.window.len()
    }

    /// Bytes currently pending in the window.
    pub fn fill_level(&self) -> usize {
        self.position
    }

    /// Ingest one inbound chunk from the raw transport.
    ///
    /// Aggregates into the window, flushing at the 80% threshold; a chunk
    /// larger than the whole window is emitted directly, unbuffered.
    pub fn process_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        self.stats.bytes_received += data.len() as u64;
        self.stats.last_activity_ms = monotonic_ms();

        if self.position + data.len() <= self.window.len() {
            self.window[self.position..self.position + data.len()].copy_from_slice(data);
            self.position += data.len();
        } else {
            self.flush();
            if data.len() <= self.window.len() {
                self.window[..data.len()].copy_from_slice(data);
                self.position = data.len();
            } else {
                // Oversized chunk: bypass the window entirely
                trace!(len = data.len(), "oversized chunk bypasses coalescing window");
                self.emit(TransportEvent::Data(data.to_vec()));
                return;
            }
        }

        if self.position >= self.flush_threshold {
            self.flush();
        }
    }

    /// Force-emit any pending bytes. No-op when the window is empty.
    pub fn flush(&mut self) {
        if self.position == 0 {
            return;
        }
        let batch = self.window[..self.position].to_vec();
        self.position = 0;
        trace!(len = batch.len(), "flushing coalescing window");
        self.emit(TransportEvent::Data(batch));
    }

    /// Account bytes successfully written to the transport.
    pub fn record_sent(&mut self, bytes: usize) {
        self.stats.bytes_sent += bytes as u64;
        self.stats.frames_sent += 1;
        self.stats.last_activity_ms = monotonic_ms();
    }

    /// Account a driver fault and surface it on the event channel.
    pub fn report_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.stats.errors += 1;
        debug!(error = %message, "transport driver error");
        self.emit(TransportEvent::Error(message));
    }

    /// Surface an unexpected connection drop on the event channel.
    pub fn report_disconnect(&mut self) {
        self.emit(TransportEvent::Disconnected);
    }

    /// Statistics snapshot with uptime computed against the window's clock.
    pub fn stats(&self) -> CommunicationStats {
        let mut snapshot = self.stats;
        snapshot.uptime_ms = self.opened_at.elapsed().as_millis() as u64;
        snapshot
    }

    /// Zero the statistics and re-base the uptime clock to now.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
        self.opened_at = Instant::now();
    }

    /// Event batches dropped because the consumer lagged.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Flush pending bytes ahead of driver teardown.
    pub fn destroy(&mut self) {
        self.flush();
    }

    fn emit(&mut self, event: TransportEvent) {
        // Never block the driver's read loop: a full channel drops the batch
        if self.events.try_send(event).is_err() {
            self.dropped_events += 1;
            warn!(dropped = self.dropped_events, "event channel full, dropping batch");
        }
    }
}
