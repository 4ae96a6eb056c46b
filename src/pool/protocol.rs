//! Tagged request/response protocol between the pool and its workers.
//!
//! Cross-thread communication is strictly request/response: a task goes in,
//! a reply comes out on the request's own `oneshot` channel, and every reply
//! carries the originating request's correlation id. Workers never share
//! mutable state with the pool or with each other.

use tokio::sync::oneshot;

use crate::config::FrameExtractorConfig;
use crate::types::Frame;

/// Requests the pool sends to a worker thread.
#[derive(Debug)]
pub(crate) enum WorkerRequest {
    /// Replace the worker's extractor configuration
    Configure {
        id: u64,
        config: Box<FrameExtractorConfig>,
        reply: oneshot::Sender<WorkerReply>,
    },
    /// Extract frames from a chunk of bytes
    ProcessData { id: u64, data: Vec<u8>, reply: oneshot::Sender<WorkerReply> },
    /// Clear the worker's buffer, queue and sequence counter
    Reset { id: u64, reply: oneshot::Sender<WorkerReply> },
    /// Snapshot the worker's extraction counters
    GetStats { id: u64, reply: oneshot::Sender<WorkerReply> },
    /// Exit the worker loop cleanly
    Shutdown,
    /// Panic the worker thread (crash-recovery tests only)
    #[cfg(test)]
    Crash,
}

/// Replies workers send back, echoing the request's correlation id.
#[derive(Debug)]
pub(crate) enum WorkerReply {
    Configured { id: u64 },
    FramesProduced { id: u64, frames: Vec<Frame> },
    ResetDone { id: u64 },
    Stats { id: u64, stats: WorkerSnapshot },
    Error { id: u64, message: String },
}

impl WorkerReply {
    /// Correlation id echoed from the originating request.
    pub(crate) fn correlation_id(&self) -> u64 {
        match self {
            WorkerReply::Configured { id }
            | WorkerReply::FramesProduced { id, .. }
            | WorkerReply::ResetDone { id }
            | WorkerReply::Stats { id, .. }
            | WorkerReply::Error { id, .. } => *id,
        }
    }
}

/// Point-in-time view of one worker's extraction state.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WorkerSnapshot {
    /// Tasks the worker has completed
    pub tasks_processed: u64,
    /// Frames the worker's extractor has produced
    pub frames_extracted: u64,
    /// Bytes buffered but not yet framed
    pub pending_bytes: usize,
}
