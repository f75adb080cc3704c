//! # Processing Engine
//!
//! Chunked, memory-bounded parallel processing of a single input source.
//!
//! The engine owns a fixed worker pool and a status monitor thread for its
//! whole lifetime; each call to one of the `process_*` methods runs exactly
//! one job through them. Chunk ids are assigned in source order and results
//! are re-sorted by id before they are returned, so worker completion order
//! never affects output order. A transform failure is isolated to its chunk:
//! it is counted, reported through the observer, and the job still completes.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use thiserror::Error;
use tracing::{debug, info};

use crate::chunk::{self, Chunk};
use crate::config::Config;
use crate::constants::{CHANNEL_CAPACITY_MULTIPLIER, MIN_CHANNEL_CAPACITY, SHUTDOWN_JOIN_TIMEOUT};
use crate::memory::{self, ProcessMemorySampler};
use crate::source::{BufferSource, FileSource, InputSource, SourceError};
use crate::util::{human_bytes, join_with_timeout};

mod monitor;
mod state;
mod workers;

pub use state::{JobSnapshot, JobStats};

use state::JobState;
use workers::{ChunkJob, ChunkOutcome, ChunkResult, WorkerTask};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("input is empty")]
    EmptyInput,
    #[error("another job is already running on this engine")]
    JobInProgress,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("worker channel closed unexpectedly")]
    ChannelClosed,
}

/// Per-chunk transformation supplied by the caller. Blanket-implemented for
/// closures, so `|chunk: &Chunk| -> anyhow::Result<T>` works directly.
pub trait ChunkTransform<T>: Send + Sync {
    fn apply(&self, chunk: &Chunk) -> anyhow::Result<T>;
}

impl<T, F> ChunkTransform<T> for F
where
    F: Fn(&Chunk) -> anyhow::Result<T> + Send + Sync,
{
    fn apply(&self, chunk: &Chunk) -> anyhow::Result<T> {
        self(chunk)
    }
}

/// Job lifecycle callbacks. All methods default to no-ops; implement only
/// what the embedding application cares about. Implementations are invoked
/// from engine threads and must not block for long.
pub trait JobObserver: Send + Sync {
    fn on_progress(&self, _fraction: f64, _snapshot: &JobSnapshot) {}
    fn on_status(&self, _message: &str, _snapshot: &JobSnapshot) {}
    fn on_error(&self, _message: &str, _error: &(dyn std::error::Error + Send + Sync)) {}
    fn on_complete(&self, _stats: &JobStats) {}
}

struct NoopObserver;

impl JobObserver for NoopObserver {}

/// Final result of a job. A job with failed chunks is still `Ok`; callers
/// must inspect `stats.error_count` to detect partial failure.
#[derive(Debug)]
pub struct JobReport<T> {
    pub stats: JobStats,
    /// Per-chunk transform outputs, ordered by chunk id. Failed and skipped
    /// chunks contribute no entry.
    pub results: Vec<T>,
    pub cancelled: bool,
}

/// Releases the engine's active-job claim on every exit path.
struct JobGuard<'a> {
    job: &'a JobState,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.job.end();
    }
}

pub struct Engine<T: Send + 'static> {
    cfg: Config,
    workers: usize,
    task_tx: Sender<WorkerTask<T>>,
    outcome_rx: Receiver<ChunkOutcome<T>>,
    worker_handles: Vec<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    job: Arc<JobState>,
    observer: Arc<dyn JobObserver>,
}

impl<T: Send + 'static> std::fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Engine<T> {
    pub fn new(cfg: Config) -> Result<Self, EngineError> {
        Self::with_observer(cfg, Arc::new(NoopObserver))
    }

    pub fn with_observer(cfg: Config, observer: Arc<dyn JobObserver>) -> Result<Self, EngineError> {
        cfg.validate().map_err(EngineError::InvalidConfig)?;
        let workers = cfg.resolve_workers();
        let capacity = workers
            .saturating_mul(CHANNEL_CAPACITY_MULTIPLIER)
            .max(MIN_CHANNEL_CAPACITY);

        let (task_tx, task_rx) = bounded::<WorkerTask<T>>(capacity);
        let (outcome_tx, outcome_rx) = bounded::<ChunkOutcome<T>>(capacity);
        let cancel = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let job = Arc::new(JobState::default());

        let worker_handles = workers::spawn_workers(workers, task_rx, outcome_tx, cancel.clone());
        let monitor_handle = monitor::spawn_monitor(
            Duration::from_millis(cfg.monitor_interval_ms),
            job.clone(),
            observer.clone(),
            shutdown.clone(),
        );

        info!("engine started workers={workers} queue_capacity={capacity}");

        Ok(Self {
            cfg,
            workers,
            task_tx,
            outcome_rx,
            worker_handles,
            monitor_handle: Some(monitor_handle),
            shutdown,
            cancel,
            job,
            observer,
        })
    }

    /// Cooperative cancellation flag for the current (or next) job. Setting
    /// it stops further chunks from being read and makes queued-but-unstarted
    /// chunks report as skipped; in-flight transforms run to completion. The
    /// engine never clears the flag itself.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn process_file(
        &self,
        path: &Path,
        transform: impl ChunkTransform<T> + 'static,
    ) -> Result<JobReport<T>, EngineError> {
        let source = match FileSource::open(path) {
            Ok(source) => source,
            Err(err) => {
                let err = EngineError::from(err);
                self.observer
                    .on_error(&format!("cannot open {}: {err}", path.display()), &err);
                return Err(err);
            }
        };
        self.process_source(Box::new(source), transform)
    }

    /// Process an in-memory text. Chunking happens on the UTF-8 byte encoding
    /// so files and text behave identically; the transform receives a decoded
    /// fragment through [`Chunk::as_text`] rather than raw bytes.
    pub fn process_text(
        &self,
        text: &str,
        transform: impl Fn(&str) -> anyhow::Result<T> + Send + Sync + 'static,
    ) -> Result<JobReport<T>, EngineError> {
        let adapter = move |chunk: &Chunk| transform(chunk.as_text().as_ref());
        self.process_source(Box::new(BufferSource::from_text(text)), adapter)
    }

    pub fn process_bytes(
        &self,
        data: Vec<u8>,
        transform: impl ChunkTransform<T> + 'static,
    ) -> Result<JobReport<T>, EngineError> {
        self.process_source(Box::new(BufferSource::new(data)), transform)
    }

    pub fn process_source(
        &self,
        source: Box<dyn InputSource>,
        transform: impl ChunkTransform<T> + 'static,
    ) -> Result<JobReport<T>, EngineError> {
        if !self.job.try_begin() {
            return Err(EngineError::JobInProgress);
        }
        let _guard = JobGuard { job: &self.job };
        self.run_job(source, Arc::new(transform))
    }

    fn run_job(
        &self,
        source: Box<dyn InputSource>,
        transform: Arc<dyn ChunkTransform<T>>,
    ) -> Result<JobReport<T>, EngineError> {
        let total_bytes = source.len();
        if total_bytes == 0 {
            let err = EngineError::EmptyInput;
            self.observer
                .on_error("refusing to process empty input", &err);
            return Err(err);
        }

        let started_at = Utc::now();
        let available = memory::available_memory();
        let chunk_size = chunk::plan_chunk_size(
            total_bytes,
            available,
            self.workers,
            self.cfg.min_chunk_bytes(),
            self.cfg.max_chunk_bytes(),
            self.cfg.memory_target_fraction,
        );
        let total_chunks = chunk::chunk_count(total_bytes, chunk_size);
        let initial_rss = ProcessMemorySampler::new().sample();
        self.job
            .reset(total_bytes, chunk_size, total_chunks, initial_rss);

        info!(
            "job started run_id={} total={} chunk_size={} total_chunks={total_chunks} workers={}",
            self.cfg.run_id,
            human_bytes(total_bytes),
            human_bytes(chunk_size),
            self.workers
        );

        // Enqueue phase: read the source strictly in chunk_size increments.
        let mut enqueued = 0u64;
        let mut offset = 0u64;
        let mut read_failure: Option<SourceError> = None;
        for id in 0..total_chunks {
            if self.cancel.load(Ordering::Relaxed) {
                debug!("cancellation requested; stopping enqueue at chunk {id}");
                break;
            }
            let want = chunk_size.min(total_bytes - offset) as usize;
            let data = match read_exact_at(source.as_ref(), offset, want) {
                Ok(data) => data,
                Err(err) => {
                    read_failure = Some(err);
                    break;
                }
            };
            if data.is_empty() {
                break;
            }
            offset += data.len() as u64;

            let job = ChunkJob {
                chunk: Chunk {
                    id,
                    data: Arc::new(data),
                },
                transform: transform.clone(),
            };
            if self.task_tx.send(WorkerTask::Chunk(job)).is_err() {
                return Err(EngineError::ChannelClosed);
            }
            enqueued += 1;
        }

        // Drain phase: every enqueued task is acknowledged by exactly one
        // outcome, so receiving `enqueued` outcomes empties both queues.
        let mut collected: Vec<ChunkOutcome<T>> = Vec::with_capacity(enqueued as usize);
        for _ in 0..enqueued {
            let outcome = self
                .outcome_rx
                .recv()
                .map_err(|_| EngineError::ChannelClosed)?;

            match &outcome.result {
                ChunkResult::Value(_) => {
                    self.job
                        .record_processed(outcome.chunk_len, outcome.duration);
                }
                ChunkResult::Failed(err) => {
                    self.job
                        .record_processed(outcome.chunk_len, outcome.duration);
                    self.job.record_error();
                    let cause: &(dyn std::error::Error + Send + Sync + 'static) = err.as_ref();
                    self.observer.on_error(
                        &format!("chunk {} failed: {err:#}", outcome.chunk_id),
                        cause,
                    );
                }
                ChunkResult::Skipped => {}
            }

            let snapshot = self.job.snapshot();
            let fraction = if total_chunks > 0 {
                snapshot.processed_chunks as f64 / total_chunks as f64
            } else {
                1.0
            };
            self.observer.on_progress(fraction, &snapshot);
            collected.push(outcome);
        }

        if let Some(err) = read_failure {
            let err = EngineError::from(err);
            self.observer.on_error("source read failed mid-job", &err);
            return Err(err);
        }

        // Completion order is not guaranteed; restore source order.
        collected.sort_by_key(|o| o.chunk_id);
        let mut results = Vec::with_capacity(collected.len());
        for outcome in collected {
            if let ChunkResult::Value(value) = outcome.result {
                results.push(value);
            }
        }

        let cancelled = self.cancel.load(Ordering::Relaxed);
        let stats = self
            .job
            .finish_stats(&self.cfg.run_id, started_at, Utc::now());

        if cancelled {
            info!(
                "job cancelled after {} of {} chunks",
                stats.processed_chunks, stats.total_chunks
            );
        } else {
            self.observer.on_complete(&stats);
            info!(
                "job finished processed_chunks={} error_count={} bytes={} avg_chunk_ms={:.2}",
                stats.processed_chunks,
                stats.error_count,
                stats.bytes_processed,
                stats.avg_chunk_duration_ms
            );
        }

        Ok(JobReport {
            stats,
            results,
            cancelled,
        })
    }
}

impl<T: Send + 'static> Drop for Engine<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Sentinels end the workers; if the queue is somehow full, dropping
        // the sender on engine teardown ends them too.
        for _ in &self.worker_handles {
            let _ = self.task_tx.try_send(WorkerTask::Shutdown);
        }
        for handle in self.worker_handles.drain(..) {
            join_with_timeout(handle, SHUTDOWN_JOIN_TIMEOUT, "worker");
        }
        if let Some(handle) = self.monitor_handle.take() {
            join_with_timeout(handle, SHUTDOWN_JOIN_TIMEOUT, "status monitor");
        }
    }
}

/// Read `len` bytes at `offset`, tolerating short reads; a short final chunk
/// is returned truncated.
fn read_exact_at(
    source: &dyn InputSource,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, SourceError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len];
    let mut read = 0usize;
    while read < buf.len() {
        let n = source.read_at(offset + read as u64, &mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);
    Ok(buf)
}
