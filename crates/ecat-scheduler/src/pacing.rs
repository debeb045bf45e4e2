//! Absolute-deadline cycle pacing.
//!
//! The scheduler keeps one absolute deadline and advances it by exactly one
//! period per cycle. Waking late in one cycle shortens the next wait instead
//! of shifting every later deadline, so the mean inter-cycle spacing
//! converges to the configured period.

use crate::error::{RtError, RtResult};
use crate::metrics::CycleMetrics;
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
use crate::linux::PlatformSleep;

#[cfg(not(target_os = "linux"))]
use crate::fallback::PlatformSleep;

/// Paces a cyclic loop to a fixed period.
///
/// One instance belongs to one cycling thread; it is not internally
/// synchronized.
///
/// # Example
///
/// ```no_run
/// use ecat_scheduler::CycleScheduler;
/// use std::time::Duration;
///
/// let mut scheduler = CycleScheduler::with_period(Duration::from_millis(1))?;
/// loop {
///     let cycle = scheduler.wait_for_cycle();
///     // exchange process data for this cycle
///     # if cycle > 3 { break }
/// }
/// # Ok::<(), ecat_scheduler::RtError>(())
/// ```
#[derive(Debug)]
pub struct CycleScheduler {
    period: Duration,
    deadline: Instant,
    cycle_count: u64,
    metrics: CycleMetrics,
    sleep: PlatformSleep,
}

impl CycleScheduler {
    /// Create a scheduler for the given cycle period.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::InvalidPeriod`] for a zero period.
    pub fn with_period(period: Duration) -> RtResult<Self> {
        if period.is_zero() {
            return Err(RtError::InvalidPeriod { period_ns: 0 });
        }
        Ok(Self {
            period,
            deadline: Instant::now() + period,
            cycle_count: 0,
            metrics: CycleMetrics::default(),
            sleep: PlatformSleep::new(),
        })
    }

    /// The configured cycle period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Re-anchor the deadline to one period from now.
    ///
    /// Call when a loop starts (or resumes) self-paced operation so the first
    /// cycle does not inherit a deadline from before the pause.
    pub fn restart(&mut self) {
        self.deadline = Instant::now() + self.period;
    }

    /// Block until the current cycle's deadline, then advance it.
    ///
    /// Returns the cycle count after this cycle. Arriving after the deadline
    /// is recorded as an overrun and does not block; a backlog of more than
    /// one full period re-anchors the deadline instead of replaying the
    /// missed cycles as a burst.
    pub fn wait_for_cycle(&mut self) -> u64 {
        let arrival = Instant::now();
        let overrun = arrival >= self.deadline;
        let lateness_ns = if overrun {
            arrival.duration_since(self.deadline).as_nanos() as u64
        } else {
            self.deadline.duration_since(arrival).as_nanos() as u64
        };
        self.metrics.record_cycle(lateness_ns, overrun);

        if !overrun {
            self.sleep.sleep_until(self.deadline);
        }

        self.cycle_count += 1;
        self.deadline += self.period;
        if overrun && arrival >= self.deadline {
            // Stalled for multiple periods; resume at the nominal rate.
            self.deadline = arrival + self.period;
        }
        self.cycle_count
    }

    /// Cycles completed so far.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Lateness statistics for the loop.
    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// Mutable statistics access for percentile queries.
    pub fn metrics_mut(&mut self) -> &mut CycleMetrics {
        &mut self.metrics
    }
}
