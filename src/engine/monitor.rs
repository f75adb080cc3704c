//! Status monitor thread.
//!
//! Samples process memory on a fixed cadence, folds the samples into the job
//! state, and emits a human-readable ETA line through the observer while a
//! job is running. Nothing is emitted before a job has started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::JobObserver;
use crate::engine::state::JobState;
use crate::memory::ProcessMemorySampler;
use crate::util::format_eta;

pub(crate) fn spawn_monitor(
    interval: Duration,
    job: Arc<JobState>,
    observer: Arc<dyn JobObserver>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut sampler = ProcessMemorySampler::new();
        while !shutdown.load(Ordering::Relaxed) {
            let rss = sampler.sample();
            job.record_memory(rss);

            if let Some(snapshot) = job.active_snapshot() {
                let message = format!(
                    "chunk {} of {} ({:.1}%), {}",
                    snapshot.processed_chunks,
                    snapshot.total_chunks,
                    snapshot.completion_pct,
                    format_eta(snapshot.eta_seconds),
                );
                observer.on_status(&message, &snapshot);
            }

            sleep_observing_shutdown(interval, &shutdown);
        }
    })
}

/// Sleep in short ticks so a shutdown request is observed promptly even with
/// a long monitor interval.
fn sleep_observing_shutdown(interval: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(Duration::from_millis(20).min(interval));
    }
}
