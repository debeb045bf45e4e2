//! Linux platform layer: `SCHED_FIFO` elevation and high-precision sleep.

use crate::error::RtResult;
use crate::rt_setup::RtThreadConfig;
use libc::{
    CLOCK_MONOTONIC, MCL_CURRENT, MCL_FUTURE, SCHED_FIFO, clock_nanosleep, mlockall, sched_param,
    sched_setscheduler, timespec,
};
use std::time::{Duration, Instant};

/// Tail of each sleep handled by busy-spinning for precision.
const SPIN_TAIL: Duration = Duration::from_micros(80);

pub(crate) fn apply_rt_config(config: &RtThreadConfig) -> RtResult {
    let priority = config.effective_priority();
    if priority > 0 {
        let param = sched_param {
            sched_priority: priority,
        };
        // SAFETY: param is a valid sched_param for the calling thread.
        let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            // Typically EPERM without CAP_SYS_NICE; the loop still runs at
            // normal priority.
            tracing::warn!(priority, "could not enter SCHED_FIFO, continuing unprivileged");
        }
    }

    if config.lock_memory {
        // SAFETY: flag-only libc call.
        let rc = unsafe { mlockall(MCL_CURRENT | MCL_FUTURE) };
        if rc != 0 {
            tracing::warn!("mlockall failed, page faults may add cycle jitter");
        }
    }

    Ok(())
}

/// Sleeps until an absolute instant with a busy-spin tail.
#[derive(Debug, Default)]
pub(crate) struct PlatformSleep;

impl PlatformSleep {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn sleep_until(&mut self, target: Instant) {
        let now = Instant::now();
        if target <= now {
            return;
        }
        let remaining = target.duration_since(now);

        if remaining > SPIN_TAIL {
            let bulk = remaining - SPIN_TAIL;
            let ts = timespec {
                tv_sec: bulk.as_secs() as i64,
                tv_nsec: i64::from(bulk.subsec_nanos()),
            };
            // SAFETY: ts is a valid relative timespec; remainder is unused.
            unsafe {
                clock_nanosleep(CLOCK_MONOTONIC, 0, &ts, std::ptr::null_mut());
            }
        }

        while Instant::now() < target {
            std::hint::spin_loop();
        }
    }
}
