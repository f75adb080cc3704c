use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chunkmill::chunk::Chunk;
use chunkmill::config;
use chunkmill::engine::{Engine, JobObserver, JobStats};

fn test_config(workers: usize) -> config::Config {
    let mut cfg = config::load_config(None).expect("config").config;
    cfg.run_id = "error_test".to_string();
    cfg.workers = workers;
    cfg.min_chunk_kib = 16;
    cfg.max_chunk_kib = 16;
    cfg
}

#[derive(Default)]
struct CountingObserver {
    errors: AtomicU64,
    completions: AtomicU64,
}

impl JobObserver for CountingObserver {
    fn on_error(&self, _message: &str, _error: &(dyn std::error::Error + Send + Sync)) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_complete(&self, _stats: &JobStats) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn failing_transform_still_reports_success() {
    let observer = Arc::new(CountingObserver::default());
    let engine: Engine<u64> =
        Engine::with_observer(test_config(2), observer.clone()).expect("engine");

    let data = vec![0u8; 10 * 16 * 1024];
    let report = engine
        .process_bytes(data, |_chunk: &Chunk| -> anyhow::Result<u64> {
            Err(anyhow::anyhow!("boom"))
        })
        .expect("job completes despite chunk failures");

    assert!(!report.cancelled);
    assert_eq!(report.stats.total_chunks, 10);
    assert_eq!(report.stats.error_count, 10);
    assert_eq!(report.stats.processed_chunks, 10);
    assert!(report.results.is_empty());
    // Stats are fully populated even when every chunk failed.
    assert_eq!(report.stats.bytes_processed, 10 * 16 * 1024);
    assert!(report.stats.ended_at >= report.stats.started_at);
    assert_eq!(observer.errors.load(Ordering::Relaxed), 10);
    assert_eq!(observer.completions.load(Ordering::Relaxed), 1);
}

#[test]
fn transform_error_is_isolated_to_its_chunk() {
    let engine: Engine<u64> = Engine::new(test_config(2)).expect("engine");

    let data = vec![1u8; 8 * 16 * 1024];
    let report = engine
        .process_bytes(data, |chunk: &Chunk| {
            if chunk.id == 3 {
                Err(anyhow::anyhow!("bad chunk"))
            } else {
                Ok(chunk.len() as u64)
            }
        })
        .expect("process");

    assert_eq!(report.stats.error_count, 1);
    assert_eq!(report.results.len(), 7);
    assert_eq!(report.results.iter().sum::<u64>(), 7 * 16 * 1024);
}

#[test]
fn panicking_transform_is_contained() {
    let engine: Engine<u64> = Engine::new(test_config(2)).expect("engine");

    let data = vec![0u8; 6 * 16 * 1024];
    let report = engine
        .process_bytes(data, |chunk: &Chunk| {
            if chunk.id == 0 {
                panic!("transform bug");
            }
            Ok(chunk.len() as u64)
        })
        .expect("process");

    assert_eq!(report.stats.error_count, 1);
    assert_eq!(report.results.len(), 5);

    // The pool survives; the next job runs normally.
    let report = engine
        .process_bytes(vec![0u8; 2 * 16 * 1024], |chunk: &Chunk| {
            Ok(chunk.len() as u64)
        })
        .expect("second job");
    assert_eq!(report.stats.error_count, 0);
}

#[test]
fn job_level_failure_fires_error_callback() {
    let observer = Arc::new(CountingObserver::default());
    let engine: Engine<u64> =
        Engine::with_observer(test_config(1), observer.clone()).expect("engine");

    let _ = engine
        .process_file(std::path::Path::new("/no/such/file"), |chunk: &Chunk| {
            Ok(chunk.len() as u64)
        })
        .unwrap_err();
    assert_eq!(observer.errors.load(Ordering::Relaxed), 1);
    assert_eq!(observer.completions.load(Ordering::Relaxed), 0);
}
