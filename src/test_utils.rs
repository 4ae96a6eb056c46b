//! Test utilities: a scripted transport driver and config builders.
//!
//! [`MockTransport`] satisfies the [`Transport`](crate::Transport) HAL
//! contract without touching any real device: tests inject byte chunks,
//! scripted open failures and connection drops through the paired
//! [`MockHandle`].

#![cfg(any(test, feature = "benchmark"))]

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{FramewireError, Result};
use crate::transport::{Transport, TransportBuffer, TransportEvent, ValidationReport};
use crate::types::CommunicationStats;

struct MockState {
    buffer: TransportBuffer,
    open: bool,
    fail_opens_remaining: u32,
    opens_attempted: u32,
    written: Vec<Vec<u8>>,
    config_errors: Vec<String>,
}

/// Control handle for a [`MockTransport`] that has been handed to the
/// pipeline.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver `bytes` as inbound data, flushed through the driver's
    /// coalescing window immediately.
    pub fn inject(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.buffer.process_data(bytes);
        state.buffer.flush();
    }

    /// Deliver `bytes` without forcing a flush, exercising the window's own
    /// threshold behavior.
    pub fn inject_unflushed(&self, bytes: &[u8]) {
        self.lock().buffer.process_data(bytes);
    }

    /// Simulate an unexpected connection drop.
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.open = false;
        state.buffer.report_disconnect();
    }

    /// Surface a driver error on the event channel.
    pub fn raise_error(&self, message: &str) {
        self.lock().buffer.report_error(message);
    }

    /// Make the next `count` calls to `open()` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().fail_opens_remaining = count;
    }

    /// Seed configuration-validation findings.
    pub fn set_config_errors(&self, errors: Vec<String>) {
        self.lock().config_errors = errors;
    }

    /// How many times `open()` has been called.
    pub fn opens_attempted(&self) -> u32 {
        self.lock().opens_attempted
    }

    /// Whether the driver currently reports open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Everything written through the driver so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }
}

/// Scripted in-memory transport driver.
pub struct MockTransport {
    shared: Arc<Mutex<MockState>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl MockTransport {
    /// Create a driver (to hand to the pipeline) and its control handle (to
    /// keep in the test).
    pub fn new() -> (Self, MockHandle) {
        Self::with_window_capacity(crate::transport::DEFAULT_WINDOW_CAPACITY)
    }

    /// Same as [`MockTransport::new`] with an explicit coalescing-window
    /// capacity.
    pub fn with_window_capacity(capacity: usize) -> (Self, MockHandle) {
        let (buffer, events) = TransportBuffer::new(capacity);
        let shared = Arc::new(Mutex::new(MockState {
            buffer,
            open: false,
            fail_opens_remaining: 0,
            opens_attempted: 0,
            written: Vec::new(),
            config_errors: Vec::new(),
        }));
        let handle = MockHandle { shared: Arc::clone(&shared) };
        (Self { shared, events: Some(events) }, handle)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn display_name(&self) -> String {
        "Mock transport".to_string()
    }

    fn bus_type(&self) -> &'static str {
        "mock"
    }

    async fn open(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.opens_attempted += 1;
        if state.open {
            return Err(FramewireError::transport_failed("driver already open"));
        }
        if state.fail_opens_remaining > 0 {
            state.fail_opens_remaining -= 1;
            return Err(FramewireError::transport_failed("scripted open failure"));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        if !state.open {
            return Err(FramewireError::transport_failed("driver already closed"));
        }
        state.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn is_readable(&self) -> bool {
        self.lock().open
    }

    fn is_writable(&self) -> bool {
        self.lock().open
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        if !state.open {
            return Err(FramewireError::transport_failed("driver is not writable"));
        }
        state.written.push(data.to_vec());
        state.buffer.record_sent(data.len());
        Ok(data.len())
    }

    fn validate_configuration(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        for error in &self.lock().config_errors {
            report.push(error.clone());
        }
        report
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    fn stats(&self) -> CommunicationStats {
        self.lock().buffer.stats()
    }

    fn reset_stats(&mut self) {
        self.lock().buffer.reset_stats();
    }

    fn destroy(&mut self) {
        let mut state = self.lock();
        state.buffer.destroy();
        state.open = false;
    }
}
