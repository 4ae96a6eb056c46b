//! Transport-agnostic frame extraction for live data visualization.
//!
//! Framewire turns a continuous byte stream — serial line, TCP/UDP socket,
//! BLE characteristic — into discrete, validated frames at sustained high
//! rates, with bounded memory and without ever blocking the producer.
//!
//! # Features
//!
//! - **Multi-mode framing**: end/start/start+end delimiters, raw
//!   pass-through, QuickPlot line endings and JSON object detection
//! - **Checksum validation**: CRC-8/16/32, Fletcher, XOR/additive sums,
//!   MD5/SHA digests as fixed-length frame trailers
//! - **Bounded everywhere**: ring-buffer staging and frame queues apply
//!   drop-oldest backpressure — freshest data wins under overload
//! - **Worker pool**: CPU-parallel extraction across OS threads with strict
//!   per-stream ordering and automatic crash recovery
//! - **Connection lifecycle**: reconnection, statistics and typed events
//!   owned by a single orchestrator per connection
//!
//! # Quick Start
//!
//! Feeding bytes straight into an extractor:
//!
//! ```rust
//! use framewire::FrameExtractor;
//!
//! let mut extractor = FrameExtractor::with_defaults();
//! extractor.feed(b"21.5,48.2\n22.0,47.9\n");
//!
//! while let Some(frame) = extractor.dequeue() {
//!     println!("frame {}: {} bytes", frame.sequence, frame.len());
//! }
//! ```
//!
//! Driving a full connection (the driver comes from your transport layer —
//! anything implementing [`Transport`]):
//!
//! ```rust,no_run
//! use framewire::{
//!     ConnectionConfig, ConnectionOrchestrator, DeliveryRate, FrameExtractorConfig,
//!     Transport, TransportProfile,
//! };
//! use futures::StreamExt;
//!
//! # async fn example(driver: Box<dyn Transport>) -> framewire::Result<()> {
//! let config = ConnectionConfig::new(TransportProfile::Tcp {
//!     host: "192.168.4.1".to_string(),
//!     port: 5000,
//! });
//! let orchestrator = ConnectionOrchestrator::new(config, FrameExtractorConfig::default())?;
//!
//! let mut frames = orchestrator.frame_stream(DeliveryRate::Max(60));
//! orchestrator.connect(driver).await?;
//!
//! while let Some(frame) = frames.next().await {
//!     println!("frame {}: {} bytes", frame.sequence, frame.len());
//! }
//! # Ok(())
//! # }
//! ```

// Core data model and configuration
mod config;
mod error;
mod types;

// Extraction engine
mod buffer;
pub mod checksum;
mod extractor;

// Transport HAL and connection management
mod orchestrator;
mod pool;
mod stream;
mod transport;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

pub use buffer::RingBuffer;
pub use config::{
    ConnectionConfig, DEFAULT_BUFFER_CAPACITY, FrameDetection, FrameExtractorConfig,
    OperationMode, PoolConfig, TransportProfile,
};
pub use error::{FramewireError, Result};
pub use extractor::{FRAME_QUEUE_CAPACITY, FrameExtractor};
pub use orchestrator::{ConnectionOrchestrator, PipelineEvent};
pub use pool::{PoolStatistics, StreamTag, WorkerEvent, WorkerPool, WorkerRecord};
pub use stream::{DeliveryRate, Throttle, ThrottleExt};
pub use transport::{
    DEFAULT_WINDOW_CAPACITY, Transport, TransportBuffer, TransportEvent, ValidationReport,
};
pub use types::{CommunicationStats, ConnectionState, Frame};
