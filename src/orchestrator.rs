//! Connection lifecycle, event fan-out and extraction routing.
//!
//! [`ConnectionOrchestrator`] is the assembly point of the pipeline: it owns
//! the transport driver, the connection state machine and the statistics
//! aggregate, and routes inbound bytes either to an in-process
//! [`FrameExtractor`] or to a [`WorkerPool`] when threaded extraction is
//! enabled.
//!
//! A spawned pump task consumes the driver's event channel and emits typed
//! [`PipelineEvent`]s on a broadcast channel — frames, state changes, errors
//! and statistics all arrive through one subscription, never through
//! string-keyed callbacks. Slow subscribers lag and lose the oldest events,
//! consistent with the pipeline's freshest-data-first policy.
//!
//! Reconnection is owned here too: on an unexpected drop (with
//! `auto_reconnect` enabled) the pump transitions to `Reconnecting` and
//! retries `driver.open()` on a fixed interval until it succeeds, the
//! attempt budget is exhausted, or the connection is torn down.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, FrameExtractorConfig, PoolConfig};
use crate::error::{FramewireError, Result};
use crate::extractor::FrameExtractor;
use crate::pool::{StreamTag, WorkerEvent, WorkerPool};
use crate::stream::{DeliveryRate, ThrottleExt};
use crate::transport::{Transport, TransportEvent};
use crate::types::{CommunicationStats, ConnectionState, Frame, monotonic_ms};

/// Statistics emission cadence while a connection is live.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Event-channel depth for pipeline subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Distinct stream tag per orchestrator instance, so concurrent connections
/// pin to distinct pool workers.
static NEXT_STREAM_TAG: AtomicU64 = AtomicU64::new(1);

/// Typed notifications emitted by the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A validated frame was extracted
    FrameReceived(Frame),
    /// The connection state machine moved
    StateChanged(ConnectionState),
    /// A transport or extraction fault (display form; counters carry the
    /// authoritative tally)
    Error(String),
    /// Periodic aggregated statistics snapshot
    StatisticsUpdated(CommunicationStats),
    /// A pool worker failed
    WorkerError {
        /// Id of the failing worker
        worker_id: usize,
        /// Failure description
        message: String,
    },
    /// A pool worker thread exited
    WorkerExit {
        /// Id of the exited worker
        worker_id: usize,
        /// False when the exit was a crash
        clean: bool,
    },
}

/// Commands the orchestrator sends to the pump's in-process extractor.
enum PumpCommand {
    Configure(Box<FrameExtractorConfig>),
    ResetExtractor,
}

struct OrchestratorStats {
    /// Counters owned by the orchestrator/extraction side (the driver owns
    /// its own byte counters; snapshots merge the two)
    base: CommunicationStats,
    connected_at: Option<Instant>,
}

struct OrchestratorShared {
    events: broadcast::Sender<PipelineEvent>,
    state: watch::Sender<ConnectionState>,
    stats: StdMutex<OrchestratorStats>,
    paused: AtomicBool,
    threaded: AtomicBool,
    cancel: CancellationToken,
}

impl OrchestratorShared {
    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine; events are advisory
        let _ = self.events.send(event);
    }

    fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.lock_stats().base.errors += 1;
        self.emit(PipelineEvent::Error(message));
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, OrchestratorStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the state machine, counting completed reconnect cycles.
    ///
    /// Illegal transitions are dropped rather than applied: a teardown racing
    /// the pump can ask for `Disconnected -> Reconnecting`, which must lose.
    fn set_state(&self, next: ConnectionState) {
        let previous = *self.state.borrow();
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!(%previous, %next, "dropping illegal connection state transition");
            return;
        }

        if previous == ConnectionState::Reconnecting && next == ConnectionState::Connected {
            self.lock_stats().base.reconnections += 1;
        }

        debug!(%previous, %next, "connection state changed");
        self.state.send_replace(next);
        self.emit(PipelineEvent::StateChanged(next));
    }
}

type DriverSlot = Arc<AsyncMutex<Option<Box<dyn Transport>>>>;

/// Owns the connection state machine, the transport driver, and the
/// extraction routing for one connection.
pub struct ConnectionOrchestrator {
    connection_config: ConnectionConfig,
    frame_config: StdMutex<FrameExtractorConfig>,
    shared: Arc<OrchestratorShared>,
    driver: DriverSlot,
    pool: Option<Arc<WorkerPool>>,
    pump_commands: StdMutex<Option<mpsc::Sender<PumpCommand>>>,
    pump_cancel: StdMutex<Option<CancellationToken>>,
    stream_tag: StreamTag,
    destroyed: AtomicBool,
}

impl ConnectionOrchestrator {
    /// Build an orchestrator for one connection. Both configurations are
    /// validated up front.
    pub fn new(
        connection_config: ConnectionConfig,
        frame_config: FrameExtractorConfig,
    ) -> Result<Self> {
        connection_config.validate()?;
        frame_config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            connection_config,
            frame_config: StdMutex::new(frame_config),
            shared: Arc::new(OrchestratorShared {
                events,
                state,
                stats: StdMutex::new(OrchestratorStats {
                    base: CommunicationStats::default(),
                    connected_at: None,
                }),
                paused: AtomicBool::new(false),
                threaded: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            driver: Arc::new(AsyncMutex::new(None)),
            pool: None,
            pump_commands: StdMutex::new(None),
            pump_cancel: StdMutex::new(None),
            stream_tag: StreamTag(NEXT_STREAM_TAG.fetch_add(1, Ordering::Relaxed)),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Spawn a worker pool and route subsequent inbound data through it.
    ///
    /// Worker lifecycle events are forwarded onto the pipeline event
    /// channel. Must be called from within a tokio runtime.
    pub fn enable_pooled_extraction(&mut self, pool_config: PoolConfig) -> Result<()> {
        if self.pool.is_some() {
            return Err(FramewireError::invalid_config(
                "pool",
                "pooled extraction is already enabled",
            ));
        }

        let frame_config = self.lock_frame_config().clone();
        let pool = Arc::new(WorkerPool::new(pool_config, frame_config)?);

        // Forward worker lifecycle events to pipeline subscribers
        let mut worker_events = pool.subscribe();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    event = worker_events.recv() => match event {
                        Ok(WorkerEvent::Error { worker_id, message }) => {
                            shared.lock_stats().base.errors += 1;
                            shared.emit(PipelineEvent::WorkerError { worker_id, message });
                        }
                        Ok(WorkerEvent::Exit { worker_id, clean }) => {
                            shared.emit(PipelineEvent::WorkerExit { worker_id, clean });
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        self.pool = Some(pool);
        self.shared.threaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Toggle routing between the in-process extractor and the worker pool.
    pub fn set_threaded_extraction(&self, enabled: bool) -> Result<()> {
        if enabled && self.pool.is_none() {
            return Err(FramewireError::invalid_config(
                "threaded_frame_extraction",
                "no worker pool; call enable_pooled_extraction first",
            ));
        }
        self.shared.threaded.store(enabled, Ordering::Release);
        Ok(())
    }

    /// Whether inbound data currently routes through the worker pool.
    pub fn is_threaded_extraction(&self) -> bool {
        self.shared.threaded.load(Ordering::Acquire)
    }

    /// Connect using `driver`, which was constructed by an external driver
    /// factory for this orchestrator's [`ConnectionConfig`].
    ///
    /// Validates the driver's configuration, opens it, and starts the pump
    /// task that turns its inbound bytes into [`PipelineEvent`]s.
    pub async fn connect(&self, mut driver: Box<dyn Transport>) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(FramewireError::Terminated { component: "ConnectionOrchestrator" });
        }

        match self.state() {
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                self.disconnect().await?;
            }
            ConnectionState::Error => self.shared.set_state(ConnectionState::Disconnected),
            ConnectionState::Connecting => {
                return Err(FramewireError::transport_failed("connect already in progress"));
            }
            ConnectionState::Disconnected => {}
        }

        let report = driver.validate_configuration();
        if !report.is_valid() {
            return Err(FramewireError::invalid_config("driver", report.errors.join("; ")));
        }

        self.shared.set_state(ConnectionState::Connecting);

        if let Err(error) = driver.open().await {
            self.shared.set_state(ConnectionState::Error);
            self.shared.record_error(error.to_string());
            return Err(error);
        }

        let Some(transport_events) = driver.take_events() else {
            let _ = driver.close().await;
            self.shared.set_state(ConnectionState::Error);
            return Err(FramewireError::transport_failed("driver event channel already consumed"));
        };

        info!(driver = %driver.display_name(), bus = driver.bus_type(), "connected");

        // Park any previous (closed) driver and install the new one
        {
            let mut slot = self.driver.lock().await;
            if let Some(mut old) = slot.replace(driver) {
                old.destroy();
            }
        }

        let extractor = FrameExtractor::new(self.lock_frame_config().clone())?;
        let (command_tx, command_rx) = mpsc::channel(8);
        let pump_cancel = self.shared.cancel.child_token();

        *lock_std(&self.pump_commands) = Some(command_tx);
        if let Some(previous) = lock_std(&self.pump_cancel).replace(pump_cancel.clone()) {
            previous.cancel();
        }

        {
            let mut stats = self.shared.lock_stats();
            stats.connected_at = Some(Instant::now());
        }

        tokio::spawn(pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.driver),
            self.pool.clone(),
            self.connection_config.clone(),
            self.stream_tag,
            extractor,
            transport_events,
            command_rx,
            pump_cancel,
        ));

        self.shared.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Explicitly close the connection and tear down the driver.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(cancel) = lock_std(&self.pump_cancel).take() {
            cancel.cancel();
        }
        *lock_std(&self.pump_commands) = None;

        if self.state() != ConnectionState::Disconnected {
            self.shared.set_state(ConnectionState::Disconnected);
        }

        if let Some(mut driver) = self.driver.lock().await.take() {
            if driver.is_open()
                && let Err(error) = driver.close().await
            {
                warn!(%error, "driver close failed during disconnect");
            }
            driver.destroy();
        }
        Ok(())
    }

    /// Write `data` to the connected device.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if self.state() != ConnectionState::Connected {
            return Err(FramewireError::transport_failed("no device connected"));
        }

        let mut slot = self.driver.lock().await;
        let Some(driver) = slot.as_mut() else {
            return Err(FramewireError::transport_failed("no device connected"));
        };
        if !driver.is_writable() {
            return Err(FramewireError::transport_failed("device is not writable"));
        }

        match driver.write(data).await {
            Ok(written) => {
                // The driver's TransportBuffer owns the sent-byte counters;
                // only the activity timestamp is ours
                self.shared.lock_stats().base.last_activity_ms = monotonic_ms();
                Ok(written)
            }
            Err(error) => {
                drop(slot);
                self.shared.record_error(error.to_string());
                Err(error)
            }
        }
    }

    /// Replace the frame-extraction configuration everywhere: the in-process
    /// extractor, every pool worker, and the template used for future
    /// connections.
    pub async fn update_frame_config(&self, config: FrameExtractorConfig) -> Result<()> {
        config.validate()?;
        *self.lock_frame_config() = config.clone();

        let command_tx = lock_std(&self.pump_commands).clone();
        if let Some(tx) = command_tx {
            let _ = tx.send(PumpCommand::Configure(Box::new(config.clone()))).await;
        }
        if let Some(pool) = &self.pool {
            pool.configure_workers(config).await?;
        }
        Ok(())
    }

    /// Reset extraction state everywhere: buffered bytes, queued frames and
    /// sequence counters start fresh.
    pub async fn reset_extraction(&self) -> Result<()> {
        let command_tx = lock_std(&self.pump_commands).clone();
        if let Some(tx) = command_tx {
            let _ = tx.send(PumpCommand::ResetExtractor).await;
        }
        if let Some(pool) = &self.pool {
            pool.reset_workers().await?;
        }
        Ok(())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch receiver for connection-state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Manual reset from the `Error` state back to `Disconnected`.
    pub fn acknowledge_error(&self) {
        if self.state() == ConnectionState::Error {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }

    /// Gate inbound data processing. Paused connections keep the transport
    /// open but drop inbound batches.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
        debug!(paused, "data processing pause toggled");
    }

    /// Whether inbound processing is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Pipeline events as a stream. Lagged subscribers silently skip the
    /// oldest events.
    pub fn events(&self) -> BoxStream<'static, PipelineEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Extracted frames as a stream, optionally throttled to a consumer's
    /// repaint rate with latest-wins semantics.
    pub fn frame_stream(&self, rate: DeliveryRate) -> BoxStream<'static, Frame> {
        let frames = BroadcastStream::new(self.subscribe()).filter_map(|event| async move {
            match event {
                Ok(PipelineEvent::FrameReceived(frame)) => Some(frame),
                _ => None,
            }
        });

        match rate.throttle_interval() {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// Aggregated statistics: orchestrator- and extraction-side counters
    /// merged with the driver's byte counters.
    pub async fn statistics(&self) -> CommunicationStats {
        aggregate_stats(&self.shared, &self.driver).await
    }

    /// Pool statistics, when pooled extraction is enabled.
    pub fn pool_statistics(&self) -> Option<crate::pool::PoolStatistics> {
        self.pool.as_ref().map(|pool| pool.statistics())
    }

    /// Zero all counters and re-base the uptime clock.
    pub async fn reset_statistics(&self) {
        {
            let mut stats = self.shared.lock_stats();
            stats.base.reset();
            if stats.connected_at.is_some() {
                stats.connected_at = Some(Instant::now());
            }
        }
        if let Some(driver) = self.driver.lock().await.as_mut() {
            driver.reset_stats();
        }
    }

    /// Tear down everything: pump, pool, driver. The orchestrator ends in
    /// `Disconnected` and rejects further processing calls.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cancel.cancel();
        if let Some(pool) = &self.pool {
            pool.terminate().await;
        }
        let _ = self.disconnect().await;
        info!("orchestrator destroyed");
    }

    fn lock_frame_config(&self) -> std::sync::MutexGuard<'_, FrameExtractorConfig> {
        lock_std_guard(&self.frame_config)
    }
}

fn lock_std<T: Clone>(mutex: &StdMutex<Option<T>>) -> std::sync::MutexGuard<'_, Option<T>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_std_guard<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn aggregate_stats(
    shared: &OrchestratorShared,
    driver: &DriverSlot,
) -> CommunicationStats {
    let mut snapshot = {
        let stats = shared.lock_stats();
        let mut snapshot = stats.base;
        snapshot.uptime_ms =
            stats.connected_at.map(|at| at.elapsed().as_millis() as u64).unwrap_or(0);
        snapshot
    };

    if let Some(driver) = driver.lock().await.as_ref() {
        snapshot.merge(&driver.stats());
    }
    snapshot
}

/// Pump task: drives one connection's inbound events until cancellation or
/// an unrecoverable drop.
#[allow(clippy::too_many_arguments)]
async fn pump(
    shared: Arc<OrchestratorShared>,
    driver: DriverSlot,
    pool: Option<Arc<WorkerPool>>,
    connection_config: ConnectionConfig,
    stream_tag: StreamTag,
    mut extractor: FrameExtractor,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    mut commands: mpsc::Receiver<PumpCommand>,
    cancel: CancellationToken,
) {
    debug!("pump started");
    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it
    stats_tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = stats_tick.tick() => {
                let snapshot = aggregate_stats(&shared, &driver).await;
                shared.emit(PipelineEvent::StatisticsUpdated(snapshot));
            }

            Some(command) = commands.recv() => match command {
                PumpCommand::Configure(config) => {
                    if let Err(error) = extractor.configure(*config) {
                        shared.record_error(error.to_string());
                    }
                }
                PumpCommand::ResetExtractor => extractor.reset(),
            },

            event = transport_events.recv() => match event {
                Some(TransportEvent::Data(bytes)) => {
                    if !shared.paused.load(Ordering::Acquire) {
                        route(&shared, &pool, stream_tag, &mut extractor, &bytes).await;
                    }
                }
                Some(TransportEvent::Error(message)) => {
                    shared.record_error(message);
                }
                Some(TransportEvent::Disconnected) | None => {
                    if !reconnect(&shared, &driver, &connection_config, &cancel).await {
                        break;
                    }
                }
            },
        }
    }
    debug!("pump stopped");
}

/// Route one inbound batch to the pool or the in-process extractor.
async fn route(
    shared: &OrchestratorShared,
    pool: &Option<Arc<WorkerPool>>,
    stream_tag: StreamTag,
    extractor: &mut FrameExtractor,
    bytes: &[u8],
) {
    if shared.threaded.load(Ordering::Acquire)
        && let Some(pool) = pool
    {
        match pool.process_stream(stream_tag, bytes).await {
            Ok(frames) => {
                deliver(shared, frames);
                return;
            }
            Err(error) => {
                // Pool trouble must not stall the stream: note it and fall
                // back to in-process extraction for this batch
                shared.record_error(error.to_string());
            }
        }
    }

    extractor.feed(bytes);
    deliver(shared, extractor.drain());
}

fn deliver(shared: &OrchestratorShared, frames: Vec<Frame>) {
    if frames.is_empty() {
        return;
    }
    {
        let mut stats = shared.lock_stats();
        stats.base.frames_received += frames.len() as u64;
        stats.base.last_activity_ms = monotonic_ms();
    }
    for frame in frames {
        shared.emit(PipelineEvent::FrameReceived(frame));
    }
}

/// Reconnect loop: fixed-interval retries until success, exhaustion or
/// cancellation. Returns whether the connection was re-established.
async fn reconnect(
    shared: &OrchestratorShared,
    driver: &DriverSlot,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if !config.auto_reconnect {
        info!("connection dropped, auto-reconnect disabled");
        shared.set_state(ConnectionState::Disconnected);
        return false;
    }

    shared.set_state(ConnectionState::Reconnecting);
    info!(
        interval_ms = config.reconnect_interval.as_millis() as u64,
        max_attempts = config.max_reconnect_attempts,
        "connection dropped, reconnecting"
    );

    for attempt in 1..=config.max_reconnect_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(config.reconnect_interval) => {}
        }

        let mut slot = driver.lock().await;
        let Some(transport) = slot.as_mut() else {
            return false;
        };

        match transport.open().await {
            Ok(()) => {
                drop(slot);
                info!(attempt, "reconnected");
                shared.set_state(ConnectionState::Connected);
                return true;
            }
            Err(error) => {
                drop(slot);
                debug!(attempt, %error, "reconnect attempt failed");
                shared.record_error(error.to_string());
            }
        }
    }

    warn!("reconnect attempts exhausted");
    shared.set_state(ConnectionState::Error);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportProfile;
    use crate::test_utils::{MockHandle, MockTransport};

    fn test_config() -> ConnectionConfig {
        let mut config = ConnectionConfig::new(TransportProfile::Serial {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
        });
        config.reconnect_interval = Duration::from_millis(50);
        config.max_reconnect_attempts = 3;
        config
    }

    fn orchestrator() -> ConnectionOrchestrator {
        ConnectionOrchestrator::new(test_config(), FrameExtractorConfig::default()).unwrap()
    }

    async fn connected() -> (ConnectionOrchestrator, MockHandle) {
        let orchestrator = orchestrator();
        let (driver, handle) = MockTransport::new();
        orchestrator.connect(Box::new(driver)).await.unwrap();
        (orchestrator, handle)
    }

    /// Wait for `count` frames on an event subscription.
    async fn collect_frames(
        events: &mut broadcast::Receiver<PipelineEvent>,
        count: usize,
    ) -> Vec<Frame> {
        let mut frames = Vec::new();
        while frames.len() < count {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Ok(PipelineEvent::FrameReceived(frame))) => frames.push(frame),
                Ok(Ok(_)) => {}
                other => panic!("frame wait failed: {other:?}"),
            }
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn connect_and_disconnect_lifecycle() {
        let (orchestrator, handle) = connected().await;
        assert_eq!(orchestrator.state(), ConnectionState::Connected);
        assert!(handle.is_open());

        orchestrator.disconnect().await.unwrap();
        assert_eq!(orchestrator.state(), ConnectionState::Disconnected);
        assert!(!handle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_bytes_become_frame_events() {
        let (orchestrator, handle) = connected().await;
        let mut events = orchestrator.subscribe();

        handle.inject(b"1.0,2.0\n3.0,4.0\n");

        let frames = collect_frames(&mut events, 2).await;
        assert_eq!(frames[0].payload.as_ref(), b"1.0,2.0");
        assert_eq!(frames[1].payload.as_ref(), b"3.0,4.0");
        assert_eq!(frames[0].sequence, 1);

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.bytes_received, 16);
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_driver_config_is_rejected_before_open() {
        let orchestrator = orchestrator();
        let (driver, handle) = MockTransport::new();
        handle.set_config_errors(vec!["port does not exist".to_string()]);

        let error = orchestrator.connect(Box::new(driver)).await.unwrap_err();
        assert!(matches!(error, FramewireError::Configuration { .. }));
        assert_eq!(orchestrator.state(), ConnectionState::Disconnected);
        assert_eq!(handle.opens_attempted(), 0, "rejected before any open attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn pause_gates_inbound_data() {
        let (orchestrator, handle) = connected().await;
        let mut events = orchestrator.subscribe();

        orchestrator.set_paused(true);
        handle.inject(b"dropped\n");
        // Give the pump a chance to (not) process it
        tokio::time::sleep(Duration::from_millis(20)).await;

        orchestrator.set_paused(false);
        handle.inject(b"delivered\n");

        let frames = collect_frames(&mut events, 1).await;
        assert_eq!(frames[0].payload.as_ref(), b"delivered");

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.frames_received, 1);
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_accounts_sent_bytes() {
        let (orchestrator, handle) = connected().await;

        let written = orchestrator.write(b"cmd:led=1\n").await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(handle.written(), vec![b"cmd:led=1\n".to_vec()]);

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_sent, 10);
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_fails_when_disconnected() {
        let orchestrator = orchestrator();
        let error = orchestrator.write(b"data").await.unwrap_err();
        assert!(matches!(error, FramewireError::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_cycle_counts_exactly_once() {
        let (orchestrator, handle) = connected().await;
        let mut states = orchestrator.state_changes();

        handle.drop_connection();
        states.wait_for(|s| *s == ConnectionState::Reconnecting).await.unwrap();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert_eq!(orchestrator.statistics().await.reconnections, 1);

        // A second drop/recover cycle counts exactly one more
        handle.drop_connection();
        states.wait_for(|s| *s == ConnectionState::Reconnecting).await.unwrap();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert_eq!(orchestrator.statistics().await.reconnections, 2);

        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_do_not_inflate_reconnect_count() {
        let (orchestrator, handle) = connected().await;
        let mut states = orchestrator.state_changes();

        handle.fail_next_opens(2);
        handle.drop_connection();

        states.wait_for(|s| *s == ConnectionState::Reconnecting).await.unwrap();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        let stats = orchestrator.statistics().await;
        assert_eq!(stats.reconnections, 1, "cycles count, not attempts");
        assert_eq!(stats.errors, 2, "each failed attempt is an error");
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_exhaustion_enters_error_state() {
        let (orchestrator, handle) = connected().await;
        let mut states = orchestrator.state_changes();

        handle.fail_next_opens(u32::MAX);
        handle.drop_connection();

        states.wait_for(|s| *s == ConnectionState::Error).await.unwrap();
        assert_eq!(handle.opens_attempted(), 1 + 3, "initial open plus three retries");

        // Manual reset brings the machine back to Disconnected
        orchestrator.acknowledge_error();
        assert_eq!(orchestrator.state(), ConnectionState::Disconnected);
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_without_auto_reconnect_disconnects() {
        let mut config = test_config();
        config.auto_reconnect = false;
        let orchestrator =
            ConnectionOrchestrator::new(config, FrameExtractorConfig::default()).unwrap();
        let (driver, handle) = MockTransport::new();
        orchestrator.connect(Box::new(driver)).await.unwrap();
        let mut states = orchestrator.state_changes();

        handle.drop_connection();
        states.wait_for(|s| *s == ConnectionState::Disconnected).await.unwrap();
        assert_eq!(orchestrator.statistics().await.reconnections, 0);
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn frame_config_update_applies_mid_stream() {
        let (orchestrator, handle) = connected().await;
        let mut events = orchestrator.subscribe();

        let config = FrameExtractorConfig {
            operation_mode: crate::config::OperationMode::ProjectFile,
            frame_detection: crate::config::FrameDetection::EndDelimiterOnly,
            finish_sequence: b"|".to_vec(),
            ..Default::default()
        };
        orchestrator.update_frame_config(config).await.unwrap();

        handle.inject(b"a|b|");
        let frames = collect_frames(&mut events, 2).await;
        assert_eq!(frames[0].payload.as_ref(), b"a");
        assert_eq!(frames[1].payload.as_ref(), b"b");
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_fails_fast_afterwards() {
        let (orchestrator, _handle) = connected().await;
        orchestrator.destroy().await;
        assert_eq!(orchestrator.state(), ConnectionState::Disconnected);

        let (driver, _handle2) = MockTransport::new();
        let error = orchestrator.connect(Box::new(driver)).await.unwrap_err();
        assert!(matches!(error, FramewireError::Terminated { .. }));

        // Idempotent
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn statistics_snapshots_are_emitted_periodically() {
        let (orchestrator, _handle) = connected().await;
        let mut events = orchestrator.subscribe();

        let mut saw_statistics = false;
        for _ in 0..16 {
            match tokio::time::timeout(Duration::from_secs(3), events.recv()).await {
                Ok(Ok(PipelineEvent::StatisticsUpdated(_))) => {
                    saw_statistics = true;
                    break;
                }
                Ok(Ok(_)) => {}
                other => panic!("event wait failed: {other:?}"),
            }
        }
        assert!(saw_statistics);
        orchestrator.destroy().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pooled_extraction_routes_through_workers() {
        let mut orchestrator = orchestrator();
        orchestrator
            .enable_pooled_extraction(PoolConfig { max_workers: 2, queue_capacity: 64 })
            .unwrap();
        assert!(orchestrator.is_threaded_extraction());

        let (driver, handle) = MockTransport::new();
        orchestrator.connect(Box::new(driver)).await.unwrap();
        let mut events = orchestrator.subscribe();

        handle.inject(b"7.1,7.2\n8.1,8.2\n");
        let frames = collect_frames(&mut events, 2).await;
        assert_eq!(frames[0].payload.as_ref(), b"7.1,7.2");

        let pool_stats = orchestrator.pool_statistics().unwrap();
        assert!(pool_stats.tasks_processed >= 1);
        orchestrator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn threaded_toggle_requires_pool() {
        let orchestrator = orchestrator();
        assert!(orchestrator.set_threaded_extraction(true).is_err());
        assert!(orchestrator.set_threaded_extraction(false).is_ok());
    }
}
