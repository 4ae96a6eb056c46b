//! Full-pipeline integration: a scripted transport driver implementing the
//! public HAL contract, driven through the orchestrator with reconnection
//! and pooled extraction.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use framewire::{
    CommunicationStats, ConnectionConfig, ConnectionOrchestrator, ConnectionState,
    FrameExtractorConfig, FramewireError, PipelineEvent, PoolConfig, Result, Transport,
    TransportBuffer, TransportEvent, TransportProfile, ValidationReport, WorkerPool,
};

/// In-memory transport driver scripted by the test.
struct ScriptedTransport {
    shared: Arc<Mutex<Scripted>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

struct Scripted {
    buffer: TransportBuffer,
    open: bool,
    fail_opens: u32,
}

#[derive(Clone)]
struct Script {
    shared: Arc<Mutex<Scripted>>,
}

impl Script {
    fn inject(&self, bytes: &[u8]) {
        let mut state = self.shared.lock().unwrap();
        state.buffer.process_data(bytes);
        state.buffer.flush();
    }

    fn drop_connection(&self) {
        let mut state = self.shared.lock().unwrap();
        state.open = false;
        state.buffer.report_disconnect();
    }

    fn fail_next_opens(&self, count: u32) {
        self.shared.lock().unwrap().fail_opens = count;
    }
}

fn scripted_transport() -> (ScriptedTransport, Script) {
    let (buffer, events) = TransportBuffer::with_default_capacity();
    let shared = Arc::new(Mutex::new(Scripted { buffer, open: false, fail_opens: 0 }));
    let script = Script { shared: Arc::clone(&shared) };
    (ScriptedTransport { shared, events: Some(events) }, script)
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn display_name(&self) -> String {
        "Scripted loopback".to_string()
    }

    fn bus_type(&self) -> &'static str {
        "loopback"
    }

    async fn open(&mut self) -> Result<()> {
        let mut state = self.shared.lock().unwrap();
        if state.open {
            return Err(FramewireError::transport_failed("already open"));
        }
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(FramewireError::transport_failed("scripted failure"));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock().unwrap();
        if !state.open {
            return Err(FramewireError::transport_failed("already closed"));
        }
        state.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().unwrap().open
    }

    fn is_readable(&self) -> bool {
        self.is_open()
    }

    fn is_writable(&self) -> bool {
        self.is_open()
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.shared.lock().unwrap();
        if !state.open {
            return Err(FramewireError::transport_failed("not writable"));
        }
        state.buffer.record_sent(data.len());
        Ok(data.len())
    }

    fn validate_configuration(&self) -> ValidationReport {
        ValidationReport::ok()
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    fn stats(&self) -> CommunicationStats {
        self.shared.lock().unwrap().buffer.stats()
    }

    fn reset_stats(&mut self) {
        self.shared.lock().unwrap().buffer.reset_stats();
    }

    fn destroy(&mut self) {
        let mut state = self.shared.lock().unwrap();
        state.buffer.destroy();
        state.open = false;
    }
}

fn fast_reconnect_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new(TransportProfile::Tcp {
        host: "127.0.0.1".to_string(),
        port: 7777,
    });
    config.reconnect_interval = Duration::from_millis(20);
    config.max_reconnect_attempts = 5;
    config
}

async fn next_frames(
    events: &mut broadcast::Receiver<PipelineEvent>,
    count: usize,
) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while frames.len() < count {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(PipelineEvent::FrameReceived(frame))) => frames.push(frame.payload.to_vec()),
            Ok(Ok(_)) => {}
            other => panic!("waiting for frames failed: {other:?}"),
        }
    }
    frames
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bytes_in_frames_out() {
    let _ = tracing_subscriber::fmt::try_init();
    let orchestrator = ConnectionOrchestrator::new(
        fast_reconnect_config(),
        FrameExtractorConfig::default(),
    )
    .unwrap();
    let (driver, script) = scripted_transport();
    let mut events = orchestrator.subscribe();

    orchestrator.connect(Box::new(driver)).await.unwrap();
    script.inject(b"1.1,2.2\n3.3,4.4\n");

    let frames = next_frames(&mut events, 2).await;
    assert_eq!(frames, vec![b"1.1,2.2".to_vec(), b"3.3,4.4".to_vec()]);

    let stats = orchestrator.statistics().await;
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.bytes_received, 16);
    assert_eq!(stats.errors, 0);

    orchestrator.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_cycles_count_once_each() {
    let _ = tracing_subscriber::fmt::try_init();
    let orchestrator = ConnectionOrchestrator::new(
        fast_reconnect_config(),
        FrameExtractorConfig::default(),
    )
    .unwrap();
    let (driver, script) = scripted_transport();
    orchestrator.connect(Box::new(driver)).await.unwrap();
    let mut states = orchestrator.state_changes();

    for expected_cycles in 1..=2u64 {
        script.drop_connection();
        states.wait_for(|s| *s == ConnectionState::Reconnecting).await.unwrap();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert_eq!(orchestrator.statistics().await.reconnections, expected_cycles);
    }

    // Frames still flow after the second recovery
    let mut events = orchestrator.subscribe();
    script.inject(b"alive\n");
    assert_eq!(next_frames(&mut events, 1).await, vec![b"alive".to_vec()]);

    orchestrator.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_surface_error_state() {
    let orchestrator = ConnectionOrchestrator::new(
        fast_reconnect_config(),
        FrameExtractorConfig::default(),
    )
    .unwrap();
    let (driver, script) = scripted_transport();
    orchestrator.connect(Box::new(driver)).await.unwrap();
    let mut states = orchestrator.state_changes();

    script.fail_next_opens(u32::MAX);
    script.drop_connection();

    states.wait_for(|s| *s == ConnectionState::Error).await.unwrap();
    let stats = orchestrator.statistics().await;
    assert_eq!(stats.errors, 5, "one error per failed attempt");

    orchestrator.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pooled_extraction_end_to_end() {
    let mut orchestrator = ConnectionOrchestrator::new(
        fast_reconnect_config(),
        FrameExtractorConfig::default(),
    )
    .unwrap();
    orchestrator
        .enable_pooled_extraction(PoolConfig { max_workers: 2, queue_capacity: 128 })
        .unwrap();

    let (driver, script) = scripted_transport();
    let mut events = orchestrator.subscribe();
    orchestrator.connect(Box::new(driver)).await.unwrap();

    script.inject(b"w1\nw2\nw3\n");
    let frames = next_frames(&mut events, 3).await;
    assert_eq!(frames, vec![b"w1".to_vec(), b"w2".to_vec(), b"w3".to_vec()]);

    let pool_stats = orchestrator.pool_statistics().unwrap();
    assert!(pool_stats.active_workers >= 1);
    assert!(pool_stats.tasks_processed >= 1);

    orchestrator.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn standalone_pool_rejects_after_terminate() {
    let pool = WorkerPool::new(
        PoolConfig { max_workers: 2, queue_capacity: 16 },
        FrameExtractorConfig::default(),
    )
    .unwrap();

    assert!(pool.is_healthy());
    let frames = pool.process_data(b"x\ny\n").await.unwrap();
    assert_eq!(frames.len(), 2);

    pool.terminate().await;
    assert!(!pool.is_healthy());

    let error = pool.process_data(b"z\n").await.unwrap_err();
    assert_eq!(error.to_string(), "No available workers");
}
