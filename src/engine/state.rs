//! Per-job mutable state and the read-only views derived from it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Mutable record of the one in-flight job on an engine.
///
/// Counters are written only by the dispatcher thread while it drains
/// outcomes; the memory fields are written by the status monitor thread while
/// the job runs, which is why every field here is atomic. The `active` flag
/// doubles as the one-job-per-engine guard.
#[derive(Debug, Default)]
pub(crate) struct JobState {
    active: AtomicBool,
    total_bytes: AtomicU64,
    chunk_size: AtomicU64,
    total_chunks: AtomicU64,
    processed_chunks: AtomicU64,
    error_count: AtomicU64,
    bytes_processed: AtomicU64,
    current_memory: AtomicU64,
    peak_memory: AtomicU64,
    busy_nanos: AtomicU64,
    started_at: Mutex<Option<Instant>>,
}

impl JobState {
    /// Claim the engine for a new job. Fails if another job is running.
    pub(crate) fn try_begin(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the engine. Called from the job guard on every exit path.
    pub(crate) fn end(&self) {
        *self.started_at.lock().unwrap() = None;
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn reset(
        &self,
        total_bytes: u64,
        chunk_size: u64,
        total_chunks: u64,
        initial_memory: u64,
    ) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
        self.chunk_size.store(chunk_size, Ordering::Relaxed);
        self.total_chunks.store(total_chunks, Ordering::Relaxed);
        self.processed_chunks.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.busy_nanos.store(0, Ordering::Relaxed);
        self.current_memory.store(initial_memory, Ordering::Relaxed);
        self.peak_memory.store(initial_memory, Ordering::Relaxed);
        *self.started_at.lock().unwrap() = Some(Instant::now());
    }

    pub(crate) fn record_processed(&self, chunk_len: u64, duration: std::time::Duration) {
        self.processed_chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(chunk_len, Ordering::Relaxed);
        self.busy_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Called by the status monitor; folds the sample into the peak.
    pub(crate) fn record_memory(&self, rss: u64) {
        self.current_memory.store(rss, Ordering::Relaxed);
        self.peak_memory.fetch_max(rss, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        let total_chunks = self.total_chunks.load(Ordering::Relaxed);
        let processed_chunks = self.processed_chunks.load(Ordering::Relaxed);
        let elapsed_seconds = self
            .started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let completion_pct = if total_chunks > 0 {
            processed_chunks as f64 / total_chunks as f64 * 100.0
        } else {
            0.0
        };
        // Linear extrapolation from elapsed / progress.
        let eta_seconds = if processed_chunks > 0 && processed_chunks < total_chunks {
            let progress = processed_chunks as f64 / total_chunks as f64;
            Some((elapsed_seconds / progress - elapsed_seconds).round() as u64)
        } else {
            None
        };

        JobSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            chunk_size: self.chunk_size.load(Ordering::Relaxed),
            total_chunks,
            processed_chunks,
            error_count: self.error_count.load(Ordering::Relaxed),
            current_memory: self.current_memory.load(Ordering::Relaxed),
            peak_memory: self.peak_memory.load(Ordering::Relaxed),
            elapsed_seconds,
            completion_pct,
            eta_seconds,
        }
    }

    /// Snapshot for the monitor thread: `None` until a job has started.
    pub(crate) fn active_snapshot(&self) -> Option<JobSnapshot> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        if self.started_at.lock().unwrap().is_none() {
            return None;
        }
        Some(self.snapshot())
    }

    pub(crate) fn finish_stats(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> JobStats {
        let processed_chunks = self.processed_chunks.load(Ordering::Relaxed);
        let busy_nanos = self.busy_nanos.load(Ordering::Relaxed);
        let avg_chunk_duration_ms = if processed_chunks > 0 {
            busy_nanos as f64 / processed_chunks as f64 / 1_000_000.0
        } else {
            0.0
        };

        JobStats {
            run_id: run_id.to_string(),
            started_at,
            ended_at,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            chunk_size: self.chunk_size.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            processed_chunks,
            error_count: self.error_count.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            avg_chunk_duration_ms,
            peak_memory: self.peak_memory.load(Ordering::Relaxed),
            current_memory: self.current_memory.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a running job, handed to progress and status
/// callbacks.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub total_bytes: u64,
    pub bytes_processed: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub error_count: u64,
    pub current_memory: u64,
    pub peak_memory: u64,
    pub elapsed_seconds: f64,
    /// Completion percentage (0.0 - 100.0)
    pub completion_pct: f64,
    pub eta_seconds: Option<u64>,
}

/// Final statistics for a completed (or cancelled) job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStats {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_bytes: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub error_count: u64,
    pub bytes_processed: u64,
    pub avg_chunk_duration_ms: f64,
    pub peak_memory: u64,
    pub current_memory: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn begin_is_exclusive() {
        let state = JobState::default();
        assert!(state.try_begin());
        assert!(!state.try_begin());
        state.end();
        assert!(state.try_begin());
    }

    #[test]
    fn no_active_snapshot_before_start() {
        let state = JobState::default();
        assert!(state.active_snapshot().is_none());
        assert!(state.try_begin());
        // Claimed but not reset: start time is still unset.
        assert!(state.active_snapshot().is_none());
        state.reset(1000, 100, 10, 42);
        assert!(state.active_snapshot().is_some());
    }

    #[test]
    fn snapshot_tracks_counters() {
        let state = JobState::default();
        assert!(state.try_begin());
        state.reset(1000, 100, 10, 0);
        state.record_processed(100, Duration::from_millis(5));
        state.record_processed(100, Duration::from_millis(15));
        state.record_error();

        let snap = state.snapshot();
        assert_eq!(snap.processed_chunks, 2);
        assert_eq!(snap.bytes_processed, 200);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.completion_pct, 20.0);
        assert!(snap.eta_seconds.is_some());
    }

    #[test]
    fn peak_memory_is_monotonic() {
        let state = JobState::default();
        state.reset(0, 0, 0, 100);
        state.record_memory(500);
        state.record_memory(200);
        let snap = state.snapshot();
        assert_eq!(snap.current_memory, 200);
        assert_eq!(snap.peak_memory, 500);
    }

    #[test]
    fn average_duration_in_stats() {
        let state = JobState::default();
        state.reset(1000, 100, 10, 0);
        state.record_processed(100, Duration::from_millis(10));
        state.record_processed(100, Duration::from_millis(20));
        let stats = state.finish_stats("run", Utc::now(), Utc::now());
        assert!((stats.avg_chunk_duration_ms - 15.0).abs() < 0.5);
        assert_eq!(stats.processed_chunks, 2);
    }
}
