//! CPU-parallel frame extraction across worker threads.
//!
//! [`WorkerPool`] spawns N OS threads, each hosting an independent
//! [`FrameExtractor`](crate::FrameExtractor) with its own ring buffer. There
//! is no shared mutable memory between workers: the pool talks to them
//! through the tagged request/response protocol in [`protocol`], and workers
//! reply on per-request `oneshot` channels.
//!
//! # Ordering
//!
//! Each stream (identified by [`StreamTag`]) is pinned to exactly one worker
//! for its lifetime, so intra-stream frame ordering is a property of
//! single-producer single-consumer delivery rather than something the pool
//! must enforce globally. Parallelism comes from multiple concurrent streams
//! (or large independent bursts) landing on different workers.
//!
//! # Failure handling
//!
//! A monitor task joins every worker thread. On an unexpected exit the pool
//! marks the worker unhealthy, emits [`WorkerEvent::Error`] /
//! [`WorkerEvent::Exit`], and spawns a replacement in the same slot so
//! existing stream assignments keep resolving. A task that was in flight on
//! the dead worker is retried once on the replacement. When every worker is
//! unhealthy or the pool is terminated, [`WorkerPool::process_data`] rejects
//! immediately with [`FramewireError::PoolExhausted`] — fail-fast over
//! silent stall.

mod protocol;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FrameExtractorConfig, PoolConfig};
use crate::error::{FramewireError, Result};
use crate::types::Frame;

use protocol::{WorkerReply, WorkerRequest, WorkerSnapshot};

/// Identifies one logical byte stream for worker pinning.
///
/// Feed all chunks of one connection with the same tag and the pool
/// guarantees they are processed in order by a single worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamTag(pub u64);

/// Pool lifecycle and health events.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker failed; a replacement is being spawned
    Error { worker_id: usize, message: String },
    /// A worker thread exited (`clean` is false for crashes)
    Exit { worker_id: usize, clean: bool },
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatistics {
    /// Workers spawned over the pool's lifetime (including replacements)
    pub workers_created: u64,
    /// Workers that have exited (cleanly or not)
    pub workers_terminated: u64,
    /// Currently healthy workers
    pub active_workers: usize,
    /// Completed extraction tasks
    pub tasks_processed: u64,
    /// Exponential moving average of task round-trip time
    pub average_processing_time_ms: f64,
    /// Tasks currently in flight across all workers
    pub queue_size: usize,
}

/// Health record for one worker slot.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    /// Worker id (unique across replacements)
    pub id: usize,
    /// Whether the worker is accepting tasks
    pub healthy: bool,
    /// Tasks completed by this worker
    pub tasks_processed: u64,
    /// Last failure observed on this worker, if any
    pub last_error: Option<String>,
}

struct WorkerSlot {
    id: usize,
    healthy: bool,
    requests: mpsc::Sender<WorkerRequest>,
    tasks_processed: u64,
    last_error: Option<String>,
}

struct PoolState {
    workers: Vec<WorkerSlot>,
    assignments: HashMap<StreamTag, usize>,
    config: FrameExtractorConfig,
    cursor: usize,
    next_request_id: u64,
    next_worker_id: usize,
    workers_created: u64,
    workers_terminated: u64,
    tasks_processed: u64,
    average_processing_time_ms: f64,
    terminated: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    events: broadcast::Sender<WorkerEvent>,
    in_flight: AtomicUsize,
    cancel: CancellationToken,
    runtime: tokio::runtime::Handle,
    queue_capacity: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Worker bookkeeping stays consistent even if a panic poisoned the lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// How a single submission attempt failed.
enum SubmitFailure {
    /// The assigned worker died before replying; retry on its replacement
    WorkerLost { index: usize, worker_id: usize },
    /// Non-retryable failure
    Fatal(FramewireError),
}

/// Worker-thread pool that parallelizes extraction while preserving
/// per-stream ordering.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Spawn `config.max_workers` workers, each primed with
    /// `extractor_config`.
    ///
    /// Must be called from within a tokio runtime: worker monitors run on
    /// the runtime's blocking pool.
    pub fn new(config: PoolConfig, extractor_config: FrameExtractorConfig) -> Result<Self> {
        config.validate()?;
        extractor_config.validate()?;

        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                workers: Vec::with_capacity(config.max_workers),
                assignments: HashMap::new(),
                config: extractor_config,
                cursor: 0,
                next_request_id: 0,
                next_worker_id: 0,
                workers_created: 0,
                workers_terminated: 0,
                tasks_processed: 0,
                average_processing_time_ms: 0.0,
                terminated: false,
            }),
            events,
            in_flight: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            runtime: tokio::runtime::Handle::current(),
            queue_capacity: config.queue_capacity,
        });

        {
            let mut state = shared.lock();
            for index in 0..config.max_workers {
                spawn_worker(&shared, &mut state, index)?;
            }
        }

        info!(workers = config.max_workers, "worker pool started");
        Ok(Self { shared })
    }

    /// Subscribe to worker lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }

    /// Extract frames from `data` on the default stream.
    pub async fn process_data(&self, data: &[u8]) -> Result<Vec<Frame>> {
        self.process_stream(StreamTag::default(), data).await
    }

    /// Extract frames from `data` on the worker pinned to `tag`.
    ///
    /// Resolves once the corresponding frames are produced. Rejects with
    /// [`FramewireError::PoolExhausted`] when no healthy worker exists, and
    /// retries exactly once on a replacement if the assigned worker dies
    /// mid-task.
    pub async fn process_stream(&self, tag: StreamTag, data: &[u8]) -> Result<Vec<Frame>> {
        let started = Instant::now();

        match self.submit(tag, data).await {
            Ok(frames) => {
                self.finish_task(started);
                Ok(frames)
            }
            Err(SubmitFailure::Fatal(error)) => Err(error),
            Err(SubmitFailure::WorkerLost { index, worker_id }) => {
                warn!(worker_id, "worker lost mid-task, retrying on replacement");
                replace_worker(&self.shared, index, worker_id);
                match self.submit(tag, data).await {
                    Ok(frames) => {
                        self.finish_task(started);
                        Ok(frames)
                    }
                    Err(SubmitFailure::Fatal(error)) => Err(error),
                    Err(SubmitFailure::WorkerLost { worker_id, .. }) => {
                        Err(FramewireError::worker_failed(worker_id, "replacement died mid-task"))
                    }
                }
            }
        }
    }

    /// Broadcast a new extractor configuration to every live worker.
    ///
    /// Replacement workers spawned later inherit the same configuration.
    pub async fn configure_workers(&self, config: FrameExtractorConfig) -> Result<()> {
        config.validate()?;

        let targets = {
            let mut state = self.shared.lock();
            if state.terminated {
                return Err(FramewireError::Terminated { component: "WorkerPool" });
            }
            state.config = config.clone();
            healthy_targets(&mut state)
        };

        for (worker_id, requests, id) in targets {
            let (reply, reply_rx) = oneshot::channel();
            let request =
                WorkerRequest::Configure { id, config: Box::new(config.clone()), reply };
            if requests.send(request).await.is_err() {
                // Dead worker: its monitor respawns it with the new config
                continue;
            }
            match reply_rx.await {
                Ok(WorkerReply::Error { message, .. }) => {
                    return Err(FramewireError::worker_failed(worker_id, message));
                }
                Ok(_) | Err(_) => {}
            }
        }
        Ok(())
    }

    /// Reset every live worker's extractor state.
    pub async fn reset_workers(&self) -> Result<()> {
        let targets = {
            let mut state = self.shared.lock();
            if state.terminated {
                return Err(FramewireError::Terminated { component: "WorkerPool" });
            }
            healthy_targets(&mut state)
        };

        for (_, requests, id) in targets {
            let (reply, reply_rx) = oneshot::channel();
            if requests.send(WorkerRequest::Reset { id, reply }).await.is_ok() {
                let _ = reply_rx.await;
            }
        }
        Ok(())
    }

    /// Aggregate pool statistics.
    pub fn statistics(&self) -> PoolStatistics {
        let state = self.shared.lock();
        PoolStatistics {
            workers_created: state.workers_created,
            workers_terminated: state.workers_terminated,
            active_workers: state.workers.iter().filter(|w| w.healthy).count(),
            tasks_processed: state.tasks_processed,
            average_processing_time_ms: state.average_processing_time_ms,
            queue_size: self.shared.in_flight.load(Ordering::Acquire),
        }
    }

    /// Per-slot worker health records, refreshed with live extraction
    /// counters from each healthy worker.
    pub async fn worker_records(&self) -> Vec<WorkerRecord> {
        let targets = {
            let mut state = self.shared.lock();
            if state.terminated { Vec::new() } else { healthy_targets(&mut state) }
        };

        let mut snapshots: HashMap<usize, WorkerSnapshot> = HashMap::new();
        for (worker_id, requests, id) in targets {
            let (reply, reply_rx) = oneshot::channel();
            if requests.send(WorkerRequest::GetStats { id, reply }).await.is_ok()
                && let Ok(response) = reply_rx.await
            {
                debug_assert_eq!(response.correlation_id(), id);
                if let WorkerReply::Stats { stats, .. } = response {
                    snapshots.insert(worker_id, stats);
                }
            }
        }

        let state = self.shared.lock();
        state
            .workers
            .iter()
            .map(|slot| WorkerRecord {
                id: slot.id,
                healthy: slot.healthy,
                tasks_processed: snapshots
                    .get(&slot.id)
                    .map(|s| s.tasks_processed)
                    .unwrap_or(slot.tasks_processed),
                last_error: slot.last_error.clone(),
            })
            .collect()
    }

    /// Whether at least one worker is accepting tasks.
    pub fn is_healthy(&self) -> bool {
        let state = self.shared.lock();
        !state.terminated && state.workers.iter().any(|w| w.healthy)
    }

    /// Tear down every worker. Idempotent; queued tasks ahead of the
    /// shutdown marker complete first, then the worker threads exit.
    pub async fn terminate(&self) {
        let senders: Vec<mpsc::Sender<WorkerRequest>> = {
            let mut state = self.shared.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.assignments.clear();
            state
                .workers
                .iter_mut()
                .map(|slot| {
                    slot.healthy = false;
                    slot.requests.clone()
                })
                .collect()
        };

        self.shared.cancel.cancel();
        for sender in senders {
            let _ = sender.send(WorkerRequest::Shutdown).await;
        }
        info!("worker pool terminated");
    }

    /// Send a crash request to the worker pinned to `tag` (spawning the
    /// assignment if needed), returning the doomed worker's id.
    #[cfg(test)]
    fn inject_crash(&self, tag: StreamTag) -> usize {
        let mut state = self.shared.lock();
        let index = assign_worker(&mut state, tag).expect("no worker to crash");
        let slot = &state.workers[index];
        let _ = slot.requests.try_send(WorkerRequest::Crash);
        slot.id
    }

    async fn submit(&self, tag: StreamTag, data: &[u8]) -> Result<Vec<Frame>, SubmitFailure> {
        // Resolve the worker and build the request under the lock, but do
        // the (potentially waiting) channel send outside it
        let (index, worker_id, requests, request, reply_rx) = {
            let mut state = self.shared.lock();
            if state.terminated {
                return Err(SubmitFailure::Fatal(FramewireError::PoolExhausted));
            }
            let Some(index) = assign_worker(&mut state, tag) else {
                return Err(SubmitFailure::Fatal(FramewireError::PoolExhausted));
            };

            state.next_request_id += 1;
            let id = state.next_request_id;
            let slot = &state.workers[index];
            let (reply, reply_rx) = oneshot::channel();
            let request = WorkerRequest::ProcessData { id, data: data.to_vec(), reply };
            (index, slot.id, slot.requests.clone(), request, reply_rx)
        };

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = self.exchange(index, worker_id, requests, request, reply_rx).await;
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    async fn exchange(
        &self,
        index: usize,
        worker_id: usize,
        requests: mpsc::Sender<WorkerRequest>,
        request: WorkerRequest,
        reply_rx: oneshot::Receiver<WorkerReply>,
    ) -> Result<Vec<Frame>, SubmitFailure> {
        if requests.send(request).await.is_err() {
            return Err(SubmitFailure::WorkerLost { index, worker_id });
        }

        match reply_rx.await {
            Ok(WorkerReply::FramesProduced { frames, .. }) => {
                let mut state = self.shared.lock();
                if let Some(slot) = state.workers.get_mut(index)
                    && slot.id == worker_id
                {
                    slot.tasks_processed += 1;
                }
                Ok(frames)
            }
            Ok(WorkerReply::Error { message, .. }) => {
                let mut state = self.shared.lock();
                if let Some(slot) = state.workers.get_mut(index)
                    && slot.id == worker_id
                {
                    slot.last_error = Some(message.clone());
                }
                Err(SubmitFailure::Fatal(FramewireError::worker_failed(worker_id, message)))
            }
            Ok(_) => Err(SubmitFailure::Fatal(FramewireError::extraction_fault(
                "worker protocol violation: unexpected reply type",
            ))),
            Err(_) => Err(SubmitFailure::WorkerLost { index, worker_id }),
        }
    }

    fn finish_task(&self, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut state = self.shared.lock();
        state.tasks_processed += 1;
        state.average_processing_time_ms = if state.tasks_processed == 1 {
            elapsed_ms
        } else {
            (state.average_processing_time_ms + elapsed_ms) / 2.0
        };
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        // Dropping the slots closes every request channel, so worker threads
        // fall out of their recv loop even without an explicit terminate()
        let mut state = self.shared.lock();
        state.terminated = true;
        for slot in &mut state.workers {
            slot.healthy = false;
            let _ = slot.requests.try_send(WorkerRequest::Shutdown);
        }
        state.workers.clear();
    }
}

/// Pick (and remember) the worker index for `tag`, or `None` when no worker
/// is healthy.
fn assign_worker(state: &mut PoolState, tag: StreamTag) -> Option<usize> {
    if let Some(&index) = state.assignments.get(&tag)
        && state.workers.get(index).is_some_and(|w| w.healthy)
    {
        return Some(index);
    }

    // Round-robin over healthy workers
    let count = state.workers.len();
    for offset in 0..count {
        let index = (state.cursor + offset) % count;
        if state.workers[index].healthy {
            state.cursor = index + 1;
            state.assignments.insert(tag, index);
            return Some(index);
        }
    }
    None
}

/// Clone `(worker_id, sender, correlation_id)` for every healthy worker.
fn healthy_targets(state: &mut PoolState) -> Vec<(usize, mpsc::Sender<WorkerRequest>, u64)> {
    let mut targets = Vec::new();
    let mut next_id = state.next_request_id;
    for slot in state.workers.iter().filter(|w| w.healthy) {
        next_id += 1;
        targets.push((slot.id, slot.requests.clone(), next_id));
    }
    state.next_request_id = next_id;
    targets
}

/// Spawn a worker into `index`, wiring up its monitor.
fn spawn_worker(shared: &Arc<PoolShared>, state: &mut PoolState, index: usize) -> Result<()> {
    let worker_id = state.next_worker_id;
    state.next_worker_id += 1;

    let (requests, request_rx) = mpsc::channel(shared.queue_capacity);
    let config = state.config.clone();

    let handle = std::thread::Builder::new()
        .name(format!("framewire-worker-{worker_id}"))
        .spawn(move || worker::run(worker_id, config, request_rx))
        .map_err(|e| {
            FramewireError::worker_failed(worker_id, format!("thread spawn failed: {e}"))
        })?;

    // Monitor: join the thread and handle unexpected exits
    let monitor_shared = Arc::clone(shared);
    shared.runtime.spawn_blocking(move || {
        let crashed = handle.join().is_err();
        on_worker_exit(&monitor_shared, index, worker_id, crashed);
    });

    let slot = WorkerSlot {
        id: worker_id,
        healthy: true,
        requests,
        tasks_processed: 0,
        last_error: None,
    };
    if index < state.workers.len() {
        state.workers[index] = slot;
    } else {
        state.workers.push(slot);
    }
    state.workers_created += 1;
    debug!(worker_id, index, "worker spawned");
    Ok(())
}

/// Monitor callback: bookkeeping plus replacement for unexpected exits.
fn on_worker_exit(shared: &Arc<PoolShared>, index: usize, worker_id: usize, crashed: bool) {
    let mut state = shared.lock();
    state.workers_terminated += 1;

    if crashed {
        let message = "worker thread panicked".to_string();
        if let Some(slot) = state.workers.get_mut(index)
            && slot.id == worker_id
        {
            slot.last_error = Some(message.clone());
        }
        let _ = shared.events.send(WorkerEvent::Error { worker_id, message });
    }

    let terminating = state.terminated || shared.cancel.is_cancelled();
    let _ = shared.events.send(WorkerEvent::Exit { worker_id, clean: !crashed });

    // Replace only if the slot still belongs to the dead worker and the pool
    // is alive; a mid-task retry may have replaced it already
    let slot_current = state.workers.get(index).is_some_and(|w| w.id == worker_id);
    if slot_current && !terminating {
        if let Some(slot) = state.workers.get_mut(index) {
            slot.healthy = false;
        }
        if let Err(error) = spawn_worker(shared, &mut state, index) {
            warn!(worker_id, %error, "failed to spawn replacement worker");
        }
    }
}

/// Replace the worker at `index` if it is still the one that failed.
fn replace_worker(shared: &Arc<PoolShared>, index: usize, failed_worker_id: usize) {
    let mut state = shared.lock();
    if state.terminated {
        return;
    }
    let slot_current = state.workers.get(index).is_some_and(|w| w.id == failed_worker_id);
    if slot_current
        && let Err(error) = spawn_worker(shared, &mut state, index)
    {
        warn!(%error, "failed to spawn replacement worker");
    }
}
