//! # Update Bus
//!
//! Typed, throttled, asynchronous fan-out of update events to registered
//! handlers. Producers (engine observers, metrics exporters, arbitrary
//! threads) enqueue events keyed by a job or task identifier; one consumer
//! thread delivers them. Throttling drops events at the producer side, so a
//! chatty job can never flood the queue or the handlers.
//!
//! The bus is independent of the engine: it knows nothing about chunks or
//! jobs, only about [`UpdateEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{
    CUSTOM_THROTTLE, EVENT_POP_TIMEOUT, EVENT_PUSH_TIMEOUT, EVENT_QUEUE_CAPACITY,
    PROGRESS_THROTTLE, SHUTDOWN_JOIN_TIMEOUT, STATS_THROTTLE,
};
use crate::util::join_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Progress,
    Status,
    Error,
    Complete,
    Stats,
    Custom,
}

impl UpdateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateKind::Progress => "progress",
            UpdateKind::Status => "status",
            UpdateKind::Error => "error",
            UpdateKind::Complete => "complete",
            UpdateKind::Stats => "stats",
            UpdateKind::Custom => "custom",
        }
    }

    fn default_throttle(self) -> Duration {
        match self {
            UpdateKind::Progress => PROGRESS_THROTTLE,
            UpdateKind::Stats => STATS_THROTTLE,
            UpdateKind::Custom => CUSTOM_THROTTLE,
            UpdateKind::Status | UpdateKind::Error | UpdateKind::Complete => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub kind: UpdateKind,
    /// Job or task identifier; throttling is per (kind, key).
    pub key: String,
    pub payload: Value,
    pub enqueued_at: Instant,
}

/// Event consumer callback. Blanket-implemented for closures returning
/// `anyhow::Result<()>`. A failure is logged and never reaches the producer
/// or the sibling handlers.
pub trait UpdateHandler: Send + Sync {
    fn handle(&self, event: &UpdateEvent) -> anyhow::Result<()>;
}

impl<F> UpdateHandler for F
where
    F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &UpdateEvent) -> anyhow::Result<()> {
        self(event)
    }
}

struct BusShared {
    handlers: RwLock<HashMap<UpdateKind, Vec<Arc<dyn UpdateHandler>>>>,
    throttles: RwLock<HashMap<UpdateKind, Duration>>,
    /// Last-accepted timestamp per (kind, key). Admission is a check-and-set
    /// under this lock, so two racing producers can never both be admitted
    /// inside one throttle window.
    last_accepted: Mutex<HashMap<(UpdateKind, String), Instant>>,
}

pub struct UpdateBus {
    shared: Arc<BusShared>,
    tx: Sender<UpdateEvent>,
    rx: Receiver<UpdateEvent>,
    stop: Arc<AtomicBool>,
    consumer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl UpdateBus {
    pub fn new() -> Self {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self {
            shared: Arc::new(BusShared {
                handlers: RwLock::new(HashMap::new()),
                throttles: RwLock::new(HashMap::new()),
                last_accepted: Mutex::new(HashMap::new()),
            }),
            tx,
            rx,
            stop: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(None),
        }
    }

    /// Spawn the consumer thread. Idempotent while the consumer is running.
    pub fn start(&self) {
        let mut guard = self.consumer.lock().unwrap();
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        self.stop.store(false, Ordering::Relaxed);
        let shared = self.shared.clone();
        let rx = self.rx.clone();
        let stop = self.stop.clone();
        *guard = Some(thread::spawn(move || consumer_loop(rx, shared, stop)));
    }

    /// Signal the consumer and join it with a bounded wait. Events already
    /// queued are drained before the thread exits.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let handle = self.consumer.lock().unwrap().take();
        if let Some(handle) = handle {
            join_with_timeout(handle, SHUTDOWN_JOIN_TIMEOUT, "update bus consumer");
        }
    }

    /// Append a handler for `kind`. Handlers run in registration order.
    pub fn register_handler(&self, kind: UpdateKind, handler: impl UpdateHandler + 'static) {
        self.shared
            .handlers
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Override the minimum interval between accepted events of `kind`.
    /// `Duration::ZERO` disables throttling for that kind.
    pub fn set_throttle(&self, kind: UpdateKind, interval: Duration) {
        self.shared.throttles.write().unwrap().insert(kind, interval);
    }

    /// Enqueue an event, subject to throttling. Returns whether the event was
    /// accepted; throttled and overflow drops are silent by contract.
    pub fn publish(&self, kind: UpdateKind, key: &str, payload: Value) -> bool {
        let interval = self.throttle_for(kind);
        if !interval.is_zero() {
            let mut last = self.shared.last_accepted.lock().unwrap();
            let now = Instant::now();
            match last.get(&(kind, key.to_string())) {
                Some(prev) if now.duration_since(*prev) < interval => {
                    debug!("throttled {} event for key {key}", kind.as_str());
                    return false;
                }
                _ => {
                    last.insert((kind, key.to_string()), now);
                }
            }
        }

        let event = UpdateEvent {
            kind,
            key: key.to_string(),
            payload,
            enqueued_at: Instant::now(),
        };
        match self.tx.send_timeout(event, EVENT_PUSH_TIMEOUT) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    "update queue full; dropping {} event for key {key}",
                    kind.as_str()
                );
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                warn!("update queue disconnected; dropping {} event", kind.as_str());
                false
            }
        }
    }

    pub fn queue_progress(&self, key: &str, payload: Value) -> bool {
        self.publish(UpdateKind::Progress, key, payload)
    }

    pub fn queue_status(&self, key: &str, payload: Value) -> bool {
        self.publish(UpdateKind::Status, key, payload)
    }

    pub fn queue_error(&self, key: &str, payload: Value) -> bool {
        self.publish(UpdateKind::Error, key, payload)
    }

    pub fn queue_complete(&self, key: &str, payload: Value) -> bool {
        self.publish(UpdateKind::Complete, key, payload)
    }

    pub fn queue_stats(&self, key: &str, payload: Value) -> bool {
        self.publish(UpdateKind::Stats, key, payload)
    }

    pub fn queue_custom(&self, key: &str, payload: Value) -> bool {
        self.publish(UpdateKind::Custom, key, payload)
    }

    fn throttle_for(&self, kind: UpdateKind) -> Duration {
        self.shared
            .throttles
            .read()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_throttle())
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UpdateBus {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consumer_loop(rx: Receiver<UpdateEvent>, shared: Arc<BusShared>, stop: Arc<AtomicBool>) {
    loop {
        match rx.recv_timeout(EVENT_POP_TIMEOUT) {
            Ok(event) => dispatch(&shared, &event),
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn dispatch(shared: &BusShared, event: &UpdateEvent) {
    let handlers: Vec<Arc<dyn UpdateHandler>> = shared
        .handlers
        .read()
        .unwrap()
        .get(&event.kind)
        .cloned()
        .unwrap_or_default();

    for handler in handlers {
        // One misbehaving handler must not starve its siblings or halt the
        // consumer, so both errors and panics are contained here.
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.handle(event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    "update handler failed for {} event (key {}): {err:#}",
                    event.kind.as_str(),
                    event.key
                );
            }
            Err(_) => {
                warn!(
                    "update handler panicked for {} event (key {})",
                    event.kind.as_str(),
                    event.key
                );
            }
        }
    }
}
