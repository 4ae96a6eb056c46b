//! Worker thread main loop.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::FrameExtractorConfig;
use crate::extractor::FrameExtractor;

use super::protocol::{WorkerReply, WorkerRequest, WorkerSnapshot};

/// Run one worker's request loop to completion.
///
/// Each worker owns an independent `FrameExtractor` (and therefore its own
/// ring buffer): stream bytes never cross workers, so intra-stream ordering
/// falls out of single-producer single-consumer delivery. The loop exits
/// when a `Shutdown` request arrives or the request channel closes.
pub(crate) fn run(
    worker_id: usize,
    config: FrameExtractorConfig,
    mut requests: mpsc::Receiver<WorkerRequest>,
) {
    debug!(worker_id, "worker started");

    let mut extractor = match FrameExtractor::new(config) {
        Ok(extractor) => extractor,
        Err(error) => {
            // Config is validated before spawn; this guards against races
            debug!(worker_id, %error, "worker refused invalid configuration");
            return;
        }
    };
    let mut tasks_processed: u64 = 0;

    while let Some(request) = requests.blocking_recv() {
        match request {
            WorkerRequest::Configure { id, config, reply } => {
                let response = match extractor.configure(*config) {
                    Ok(()) => WorkerReply::Configured { id },
                    Err(error) => WorkerReply::Error { id, message: error.to_string() },
                };
                let _ = reply.send(response);
            }
            WorkerRequest::ProcessData { id, data, reply } => {
                let produced = extractor.feed(&data);
                tasks_processed += 1;
                trace!(worker_id, id, produced, "task complete");
                let _ = reply.send(WorkerReply::FramesProduced { id, frames: extractor.drain() });
            }
            WorkerRequest::Reset { id, reply } => {
                extractor.reset();
                let _ = reply.send(WorkerReply::ResetDone { id });
            }
            WorkerRequest::GetStats { id, reply } => {
                let stats = WorkerSnapshot {
                    tasks_processed,
                    frames_extracted: extractor.frames_extracted(),
                    pending_bytes: extractor.pending_bytes(),
                };
                let _ = reply.send(WorkerReply::Stats { id, stats });
            }
            WorkerRequest::Shutdown => break,
            #[cfg(test)]
            WorkerRequest::Crash => panic!("worker {worker_id} crash injected by test"),
        }
    }

    debug!(worker_id, tasks_processed, "worker stopped");
}
