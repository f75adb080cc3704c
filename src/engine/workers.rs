//! Worker pool for the processing engine.
//!
//! Workers are spawned once at engine construction and live until they
//! receive the shutdown sentinel. Each job routes its own transform through
//! the long-lived task channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::chunk::Chunk;
use crate::engine::ChunkTransform;

/// One unit of work for the pool: process a chunk, or stop the worker.
pub(crate) enum WorkerTask<T> {
    Chunk(ChunkJob<T>),
    Shutdown,
}

pub(crate) struct ChunkJob<T> {
    pub chunk: Chunk,
    pub transform: Arc<dyn ChunkTransform<T>>,
}

/// Result of one chunk task. Every dequeued chunk pushes exactly one outcome,
/// whatever happened to it.
pub(crate) struct ChunkOutcome<T> {
    pub chunk_id: u64,
    pub chunk_len: u64,
    pub duration: Duration,
    pub result: ChunkResult<T>,
}

pub(crate) enum ChunkResult<T> {
    Value(T),
    Failed(anyhow::Error),
    /// Cooperative-cancel skip: the task was dequeued after cancellation and
    /// the transform was never invoked.
    Skipped,
}

pub(crate) fn spawn_workers<T: Send + 'static>(
    workers: usize,
    task_rx: Receiver<WorkerTask<T>>,
    outcome_tx: Sender<ChunkOutcome<T>>,
    cancel: Arc<AtomicBool>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();

    for _ in 0..workers.max(1) {
        let task_rx = task_rx.clone();
        let outcome_tx = outcome_tx.clone();
        let cancel = cancel.clone();

        handles.push(thread::spawn(move || {
            for task in task_rx {
                let job = match task {
                    WorkerTask::Chunk(job) => job,
                    WorkerTask::Shutdown => break,
                };

                let chunk_id = job.chunk.id;
                let chunk_len = job.chunk.len() as u64;
                let started = Instant::now();
                let result = if cancel.load(Ordering::Relaxed) {
                    ChunkResult::Skipped
                } else {
                    // A panicking transform must still yield an outcome, or
                    // the dispatcher would wait for an acknowledgment that
                    // never comes.
                    let applied = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        job.transform.apply(&job.chunk)
                    }));
                    match applied {
                        Ok(Ok(value)) => ChunkResult::Value(value),
                        Ok(Err(err)) => ChunkResult::Failed(err),
                        Err(_) => {
                            ChunkResult::Failed(anyhow::anyhow!("chunk transform panicked"))
                        }
                    }
                };

                let outcome = ChunkOutcome {
                    chunk_id,
                    chunk_len,
                    duration: started.elapsed(),
                    result,
                };
                if let Err(err) = outcome_tx.send(outcome) {
                    warn!("outcome channel closed while sending chunk {chunk_id}: {err}");
                    break;
                }
            }
        }));
    }

    handles
}
