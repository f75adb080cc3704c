use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chunkmill::chunk::Chunk;
use chunkmill::config;
use chunkmill::engine::{Engine, EngineError};

fn test_config(workers: usize, min_kib: u64, max_kib: u64) -> config::Config {
    let mut cfg = config::load_config(None).expect("config").config;
    cfg.run_id = "test_run".to_string();
    cfg.workers = workers;
    cfg.min_chunk_kib = min_kib;
    cfg.max_chunk_kib = max_kib;
    cfg.monitor_interval_ms = 50;
    cfg
}

#[test]
fn byte_counts_recombine_to_file_size() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let input_path = temp_dir.path().join("input.bin");
    let payload: Vec<u8> = (0..1_300_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&input_path, &payload).expect("write input");

    let engine: Engine<u64> = Engine::new(test_config(2, 16, 64)).expect("engine");
    let report = engine
        .process_file(&input_path, |chunk: &Chunk| Ok(chunk.len() as u64))
        .expect("process");

    assert!(!report.cancelled);
    assert_eq!(report.results.iter().sum::<u64>(), 1_300_000);
    assert_eq!(report.stats.processed_chunks, report.stats.total_chunks);
    assert_eq!(report.results.len() as u64, report.stats.total_chunks);
    assert_eq!(report.stats.error_count, 0);
    assert_eq!(report.stats.bytes_processed, 1_300_000);
    assert!(report.stats.total_chunks > 1, "expected a multi-chunk job");
}

#[test]
fn word_counts_recombine_exactly() {
    // Single-letter words: any byte-aligned chunk boundary falls either on a
    // separator or on a whole word, so per-chunk counts sum exactly.
    let words = 200_000usize;
    let text = "a ".repeat(words);

    let engine: Engine<u64> = Engine::new(test_config(4, 16, 64)).expect("engine");
    let report = engine
        .process_text(&text, |fragment: &str| {
            Ok(fragment.split_whitespace().count() as u64)
        })
        .expect("process");

    assert_eq!(report.results.iter().sum::<u64>(), words as u64);
    assert_eq!(report.stats.error_count, 0);
}

#[test]
fn results_are_ordered_by_chunk_id() {
    let data = vec![0u8; 40 * 16 * 1024];

    let engine: Engine<u64> = Engine::new(test_config(4, 16, 16)).expect("engine");
    let report = engine
        .process_bytes(data, |chunk: &Chunk| {
            // Stagger completion so late chunks can finish first.
            std::thread::sleep(Duration::from_millis((chunk.id % 3) * 5));
            Ok(chunk.id)
        })
        .expect("process");

    let expected: Vec<u64> = (0..report.stats.total_chunks).collect();
    assert_eq!(report.results, expected);
}

#[test]
fn empty_input_fails_before_any_chunk() {
    let engine: Engine<u64> = Engine::new(test_config(2, 16, 64)).expect("engine");
    let err = engine
        .process_text("", |fragment: &str| Ok(fragment.len() as u64))
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyInput));
}

#[test]
fn missing_file_fails_before_any_chunk() {
    let engine: Engine<u64> = Engine::new(test_config(2, 16, 64)).expect("engine");
    let err = engine
        .process_file(std::path::Path::new("/no/such/input.bin"), |chunk: &Chunk| {
            Ok(chunk.len() as u64)
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::Source(_)));
}

#[test]
fn second_concurrent_job_is_rejected() {
    let engine: Arc<Engine<u64>> = Arc::new(Engine::new(test_config(2, 16, 16)).expect("engine"));
    let data = vec![0u8; 40 * 16 * 1024];
    let first_chunk_running = Arc::new(AtomicBool::new(false));

    let background = {
        let engine = engine.clone();
        let running = first_chunk_running.clone();
        std::thread::spawn(move || {
            engine.process_bytes(data, move |chunk: &Chunk| {
                running.store(true, Ordering::Relaxed);
                std::thread::sleep(Duration::from_millis(25));
                Ok(chunk.len() as u64)
            })
        })
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !first_chunk_running.load(Ordering::Relaxed) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(first_chunk_running.load(Ordering::Relaxed), "job never started");

    let err = engine
        .process_text("still busy", |fragment: &str| Ok(fragment.len() as u64))
        .unwrap_err();
    assert!(matches!(err, EngineError::JobInProgress));

    let report = background.join().expect("join").expect("first job");
    assert_eq!(report.stats.error_count, 0);

    // The engine is usable again once the first job has finished.
    let report = engine
        .process_text("free again", |fragment: &str| Ok(fragment.len() as u64))
        .expect("second job");
    assert!(!report.cancelled);
}

#[test]
fn rejects_invalid_config() {
    let mut cfg = test_config(2, 64, 16);
    cfg.run_id = "bad".to_string();
    let err = Engine::<u64>::new(cfg).unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}
