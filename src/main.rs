use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use chunkmill::chunk::Chunk;
use chunkmill::cli::{self, CountMode};
use chunkmill::config;
use chunkmill::engine::{Engine, JobObserver, JobSnapshot, JobStats};
use chunkmill::events::{UpdateBus, UpdateEvent, UpdateKind};
use chunkmill::logging;
use chunkmill::util::human_bytes;

/// Forwards engine callbacks onto the update bus, keyed by run id, so the
/// logging handlers below consume them decoupled from the job.
struct BusObserver {
    bus: Arc<UpdateBus>,
    run_id: String,
}

impl JobObserver for BusObserver {
    fn on_progress(&self, fraction: f64, snapshot: &JobSnapshot) {
        self.bus.queue_progress(
            &self.run_id,
            json!({
                "fraction": fraction,
                "processed_chunks": snapshot.processed_chunks,
                "total_chunks": snapshot.total_chunks,
                "errors": snapshot.error_count,
            }),
        );
    }

    fn on_status(&self, message: &str, snapshot: &JobSnapshot) {
        self.bus.queue_status(
            &self.run_id,
            json!({
                "message": message,
                "current_memory": snapshot.current_memory,
                "peak_memory": snapshot.peak_memory,
            }),
        );
    }

    fn on_error(&self, message: &str, _error: &(dyn std::error::Error + Send + Sync)) {
        self.bus
            .queue_error(&self.run_id, json!({ "message": message }));
    }

    fn on_complete(&self, stats: &JobStats) {
        let payload = serde_json::to_value(stats).unwrap_or(serde_json::Value::Null);
        self.bus.queue_complete(&self.run_id, payload);
    }
}

fn register_log_handlers(bus: &UpdateBus) {
    bus.register_handler(UpdateKind::Progress, |event: &UpdateEvent| {
        info!("progress {}: {}", event.key, event.payload);
        Ok(())
    });
    bus.register_handler(UpdateKind::Status, |event: &UpdateEvent| {
        if let Some(message) = event.payload.get("message").and_then(|m| m.as_str()) {
            info!("status {}: {message}", event.key);
        }
        Ok(())
    });
    bus.register_handler(UpdateKind::Error, |event: &UpdateEvent| {
        warn!("error {}: {}", event.key, event.payload);
        Ok(())
    });
    bus.register_handler(UpdateKind::Complete, |event: &UpdateEvent| {
        info!("complete {}: {}", event.key, event.payload);
        Ok(())
    });
}

fn main() -> Result<()> {
    logging::init_logging();

    let opts = cli::parse();
    let loaded = config::load_config(opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(workers) = opts.workers {
        cfg.workers = workers;
    }
    if let Some(kib) = opts.min_chunk_kib {
        cfg.min_chunk_kib = kib;
    }
    if let Some(kib) = opts.max_chunk_kib {
        cfg.max_chunk_kib = kib;
    }
    if let Some(fraction) = opts.memory_fraction {
        cfg.memory_target_fraction = fraction;
    }
    if let Some(ms) = opts.monitor_interval_ms {
        cfg.monitor_interval_ms = ms;
    }

    info!(
        "starting run_id={} input={} workers={} config_hash={}",
        cfg.run_id,
        opts.input.display(),
        cfg.resolve_workers(),
        &loaded.config_hash[..12]
    );

    let bus = Arc::new(UpdateBus::new());
    register_log_handlers(&bus);
    bus.start();

    let observer = Arc::new(BusObserver {
        bus: bus.clone(),
        run_id: cfg.run_id.clone(),
    });
    let engine: Engine<u64> = Engine::with_observer(cfg, observer)?;

    let cancel = engine.cancel_flag();
    ctrlc::set_handler(move || {
        warn!("interrupt received; cancelling job");
        cancel.store(true, Ordering::Relaxed);
    })?;

    let report = match opts.mode {
        CountMode::Bytes => {
            engine.process_file(&opts.input, |chunk: &Chunk| Ok(chunk.len() as u64))?
        }
        CountMode::Words => engine.process_file(&opts.input, |chunk: &Chunk| {
            Ok(chunk.as_text().split_whitespace().count() as u64)
        })?,
        CountMode::Lines => engine.process_file(&opts.input, |chunk: &Chunk| {
            Ok(chunk.as_text().lines().count() as u64)
        })?,
    };

    let total: u64 = report.results.iter().sum();
    let label = match opts.mode {
        CountMode::Bytes => "bytes",
        CountMode::Words => "words",
        CountMode::Lines => "lines",
    };

    if report.cancelled {
        warn!(
            "job cancelled; partial total {label}={total} ({} of {} chunks)",
            report.stats.processed_chunks, report.stats.total_chunks
        );
    } else {
        info!(
            "total {label}={total} processed={} errors={}",
            human_bytes(report.stats.bytes_processed),
            report.stats.error_count
        );
    }

    if opts.json_stats {
        println!("{}", serde_json::to_string_pretty(&report.stats)?);
    }

    bus.stop();
    Ok(())
}
