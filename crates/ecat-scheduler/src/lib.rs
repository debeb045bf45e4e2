//! Absolute-deadline cycle pacing and real-time thread setup for fieldbus masters.
//!
//! A cyclic fieldbus master has to put one process-data frame on the wire per
//! cycle, at a fixed period, from a thread the OS scheduler is free to delay.
//! This crate provides the two pieces that make that workable:
//!
//! - **[`CycleScheduler`]**: blocks the calling thread until the next cycle
//!   deadline, using absolute deadlines so jitter in one cycle never
//!   accumulates into drift of the mean rate
//! - **[`RtThreadConfig`]**: elevates the cycling thread to a capped
//!   `SCHED_FIFO` priority and locks memory, so page faults and timeslicing
//!   do not show up as bus jitter
//! - **[`CycleMetrics`]**: bounded-memory lateness tracking with percentile
//!   queries for diagnosing a misbehaving cycle rate
//!
//! # RT-Safety
//!
//! - No heap allocations in the wait path after construction
//! - `wait_for_cycle` is O(1); percentile queries reuse scratch storage
//! - Sleeping is `clock_nanosleep` plus a short busy-spin tail on Linux

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_must_use)]

pub mod error;
pub mod metrics;
pub mod pacing;
pub mod rt_setup;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(not(target_os = "linux"))]
mod fallback;

pub use error::{RtError, RtResult};
pub use metrics::CycleMetrics;
pub use pacing::CycleScheduler;
pub use rt_setup::RtThreadConfig;

/// Default real-time priority for cycle threads.
///
/// Deliberately below the platform ceiling (commonly 99) so that elevating a
/// bus thread cannot starve kernel housekeeping threads.
pub const DEFAULT_RT_PRIORITY: i32 = 48;

/// Highest priority [`RtThreadConfig`] will request.
pub const MAX_RT_PRIORITY: i32 = 97;
