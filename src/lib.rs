//! # chunkmill
//!
//! Memory-bounded parallel chunk processing engine with a throttled update bus.
//!
//! A job splits a large input (file or in-memory text/bytes) into bounded-size
//! chunks, runs a caller-supplied transform over them on a fixed pool of worker
//! threads, and reports progress, status, errors, and completion through a
//! [`engine::JobObserver`]. The [`events::UpdateBus`] fans those notifications
//! out to registered handlers asynchronously, throttled per event kind and key,
//! so a UI or metrics layer is never flooded and never blocks the job.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod constants;
pub mod engine;
pub mod events;
pub mod logging;
pub mod memory;
pub mod source;
pub mod util;
