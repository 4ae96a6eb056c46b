//! Hardware abstraction layer for transport drivers.
//!
//! The core never performs serial/network/BLE I/O itself — concrete drivers
//! live outside this crate and hand raw inbound bytes to the pipeline. This
//! module defines the contract those drivers satisfy:
//!
//! - [`Transport`] is the async driver trait the orchestrator owns behind a
//!   `Box<dyn Transport>`
//! - [`TransportBuffer`] is the per-connection coalescing window every driver
//!   embeds to aggregate small reads before emitting [`TransportEvent::Data`]
//! - [`ValidationReport`] carries side-effect-free configuration check
//!   results
//!
//! Drivers are event sources: inbound bytes, errors and disconnects arrive on
//! the channel handed out by [`Transport::take_events`], never through
//! shared mutable state.

mod buffered;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::CommunicationStats;

pub use buffered::{DEFAULT_WINDOW_CAPACITY, TransportBuffer};

/// Out-of-band notifications from a transport driver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A batch of inbound bytes (coalesced by the driver's window)
    Data(Vec<u8>),
    /// Driver-level fault; display form of the underlying error
    Error(String),
    /// The underlying connection dropped unexpectedly
    Disconnected,
}

/// Result of a side-effect-free driver configuration check.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Problems found; empty means the configuration is usable
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Report with no findings.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Whether the configuration passed validation.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a finding.
    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

/// Contract every concrete transport driver implements.
///
/// Lifecycle methods fail with a descriptive [`FramewireError::Transport`]
/// (rather than silently no-oping) when called in the wrong state:
/// `open` on an already-open driver, `close` on an already-closed one,
/// `write` when not writable.
///
/// [`FramewireError::Transport`]: crate::FramewireError
#[async_trait]
pub trait Transport: Send {
    /// Human-readable driver description, e.g. `"TCP 192.168.1.10:5000"`.
    fn display_name(&self) -> String;

    /// Bus identifier, e.g. `"serial"`, `"network"`, `"ble"`.
    fn bus_type(&self) -> &'static str;

    /// Open the underlying connection. Fails if already open.
    async fn open(&mut self) -> Result<()>;

    /// Close the underlying connection. Fails if already closed.
    async fn close(&mut self) -> Result<()>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Whether inbound data can currently be received.
    fn is_readable(&self) -> bool;

    /// Whether outbound data can currently be written.
    fn is_writable(&self) -> bool;

    /// Write `data`, returning the number of bytes written. Fails when the
    /// driver is not writable.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Check the driver's own configuration without side effects.
    fn validate_configuration(&self) -> ValidationReport;

    /// Take the event receiver for this driver. Yields `None` after the
    /// first call — there is exactly one consumer per driver.
    ///
    /// The channel spans reopen cycles: a driver that is closed and opened
    /// again keeps emitting on the same channel, so reconnection does not
    /// re-take it.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;

    /// Snapshot of the driver's lifetime statistics.
    fn stats(&self) -> CommunicationStats;

    /// Zero the driver's statistics and re-base its uptime clock.
    fn reset_stats(&mut self);

    /// Flush any pending buffered bytes and release resources. Idempotent.
    fn destroy(&mut self);
}
