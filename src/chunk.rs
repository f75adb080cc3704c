//! Chunk type and chunk-size planning.
//!
//! The planner is a pure function so sizing behavior can be unit tested
//! without touching the engine or the memory probes.

use std::borrow::Cow;
use std::sync::Arc;

use crate::constants::TARGET_CHUNK_COUNT;

/// A bounded-size contiguous slice of the job's input, the unit of parallel
/// work. Immutable once created; ownership moves from the dispatcher to
/// whichever worker dequeues it.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Monotonically increasing id, assigned in source order starting at 0.
    pub id: u64,
    pub data: Arc<Vec<u8>>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Chunk contents as text. Chunk boundaries are byte-aligned, so a
    /// fragment may start or end inside a multi-byte sequence; decoding is
    /// lossy at the edges.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Pick a chunk size for a job.
///
/// Aims for roughly [`TARGET_CHUNK_COUNT`] chunks so progress reporting stays
/// smooth, while capping per-worker resident memory at
/// `available_memory * memory_target_fraction / workers`. The floor wins over
/// a scarce memory ceiling: processing degrades to slower-but-safe rather
/// than failing.
pub fn plan_chunk_size(
    total_bytes: u64,
    available_memory: u64,
    workers: usize,
    min_bytes: u64,
    max_bytes: u64,
    memory_target_fraction: f64,
) -> u64 {
    let target_memory = (available_memory as f64 * memory_target_fraction) as u64;
    let suggested = (total_bytes / TARGET_CHUNK_COUNT).max(min_bytes);
    let memory_ceiling = target_memory / workers.max(1) as u64;
    suggested
        .min(memory_ceiling)
        .min(max_bytes)
        .max(min_bytes)
}

/// Number of chunks a job of `total_bytes` splits into.
pub fn chunk_count(total_bytes: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_bytes.div_ceil(chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn stays_within_configured_bounds() {
        for total in [1, 1024, 1024 * 1024, 10 * GIB] {
            for workers in [1, 2, 8, 64] {
                let size = plan_chunk_size(total, 8 * GIB, workers, 4096, 1024 * 1024, 0.7);
                assert!(size >= 4096, "total={total} workers={workers}");
                assert!(size <= 1024 * 1024, "total={total} workers={workers}");
            }
        }
    }

    #[test]
    fn non_decreasing_as_total_grows() {
        let mut prev = 0;
        for total in [1024, 1024 * 1024, 100 * 1024 * 1024, GIB, 10 * GIB] {
            let size = plan_chunk_size(total, 8 * GIB, 4, 4096, 64 * 1024 * 1024, 0.7);
            assert!(size >= prev, "total={total}");
            prev = size;
        }
    }

    #[test]
    fn memory_ceiling_bounds_large_chunks() {
        // 10 GiB input and only 64 MiB available: the per-worker ceiling, not
        // the suggested total/100, decides.
        let size = plan_chunk_size(10 * GIB, 64 * 1024 * 1024, 4, 4096, GIB, 0.5);
        assert_eq!(size, 64 * 1024 * 1024 / 2 / 4);
    }

    #[test]
    fn floor_wins_over_scarce_memory() {
        let size = plan_chunk_size(10 * GIB, 1024, 8, 64 * 1024, GIB, 0.1);
        assert_eq!(size, 64 * 1024);
    }

    #[test]
    fn ten_mib_scenario() {
        let total = 10 * 1024 * 1024;
        let size = plan_chunk_size(total, 16 * GIB, 2, 50 * 1024, 10_000 * 1024, 0.7);
        // total/100 exceeds the floor and sits far below both ceilings.
        assert_eq!(size, total / 100);
        assert_eq!(chunk_count(total, size), 101);
    }

    #[test]
    fn counts_partial_trailing_chunk() {
        assert_eq!(chunk_count(100, 40), 3);
        assert_eq!(chunk_count(80, 40), 2);
        assert_eq!(chunk_count(0, 40), 0);
        assert_eq!(chunk_count(100, 0), 0);
    }
}
