//! # Utility Module
//!
//! Small helpers shared across the engine and the update bus: bounded thread
//! joins and human-readable formatting.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::constants::{KIB, MIB};

/// Join a background thread, giving up after `timeout`. A thread that refuses
/// to stop is detached with a warning instead of hanging the caller.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} thread did not stop within {timeout:?}; detaching");
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!("{name} thread panicked");
    }
}

/// Format a byte count for log lines and status messages.
pub fn human_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format an ETA estimate for status messages.
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(secs) => format!("~{secs}s remaining"),
        None => "estimating".to_string(),
    }
}
