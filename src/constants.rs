//! Crate-wide tuning constants.

use std::time::Duration;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * 1024;

/// Task and outcome channel capacity is `workers * CHANNEL_CAPACITY_MULTIPLIER`.
pub const CHANNEL_CAPACITY_MULTIPLIER: usize = 4;
pub const MIN_CHANNEL_CAPACITY: usize = 16;

/// The chunk planner aims for roughly this many chunks per job.
pub const TARGET_CHUNK_COUNT: u64 = 100;

/// Update bus queue capacity.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// How long the bus consumer blocks per pop; bounds stop-request latency.
pub const EVENT_POP_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a producer may wait on a full update queue before the event is
/// dropped. Keeps bursts lossless without ever wedging a producer.
pub const EVENT_PUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded join for background threads at shutdown.
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-kind throttle windows for the update bus.
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(500);
pub const STATS_THROTTLE: Duration = Duration::from_secs(1);
pub const CUSTOM_THROTTLE: Duration = Duration::from_millis(200);
