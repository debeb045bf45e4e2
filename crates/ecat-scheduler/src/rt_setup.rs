//! Real-time configuration for cycle threads.

use crate::error::RtResult;
use crate::{DEFAULT_RT_PRIORITY, MAX_RT_PRIORITY};

#[cfg(target_os = "linux")]
use crate::linux;

/// Scheduling parameters applied to a bus cycle thread.
///
/// The priority is clamped to `1..=`[`MAX_RT_PRIORITY`]; the cap keeps bus
/// threads below the platform ceiling so kernel housekeeping threads keep
/// running even when a cycle loop misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtThreadConfig {
    /// `SCHED_FIFO` priority to request.
    pub priority: i32,
    /// Lock current and future memory pages to avoid page faults mid-cycle.
    pub lock_memory: bool,
}

impl Default for RtThreadConfig {
    fn default() -> Self {
        Self {
            priority: DEFAULT_RT_PRIORITY,
            lock_memory: true,
        }
    }
}

impl RtThreadConfig {
    /// Configuration with an explicit priority, clamped into the valid range.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority: priority.clamp(1, MAX_RT_PRIORITY),
            lock_memory: true,
        }
    }

    /// Configuration that requests no elevation at all. Useful in tests and
    /// on hosts without `CAP_SYS_NICE`.
    pub fn unprivileged() -> Self {
        Self {
            priority: 0,
            lock_memory: false,
        }
    }

    /// The priority that will actually be requested.
    pub fn effective_priority(&self) -> i32 {
        self.priority.clamp(0, MAX_RT_PRIORITY)
    }

    /// Apply this configuration to the calling thread.
    ///
    /// On Linux this requests `SCHED_FIFO` at [`Self::effective_priority`]
    /// and, when `lock_memory` is set, `mlockall`. Missing privileges degrade
    /// to a warning rather than an error so a bus can still run unprivileged
    /// at default priority. Other platforms are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RtError::SetupFailed`] only for malformed requests
    /// the OS rejects outright, not for missing privileges.
    pub fn apply_to_current_thread(&self) -> RtResult {
        #[cfg(target_os = "linux")]
        {
            linux::apply_rt_config(self)
        }
        #[cfg(not(target_os = "linux"))]
        {
            tracing::debug!("real-time thread setup is a no-op on this platform");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_is_capped_below_ceiling() {
        let config = RtThreadConfig::default();
        assert_eq!(config.priority, DEFAULT_RT_PRIORITY);
        assert!(config.priority < 99);
        assert!(config.lock_memory);
    }

    #[test]
    fn with_priority_clamps_into_range() {
        assert_eq!(RtThreadConfig::with_priority(200).priority, MAX_RT_PRIORITY);
        assert_eq!(RtThreadConfig::with_priority(-5).priority, 1);
        assert_eq!(RtThreadConfig::with_priority(48).priority, 48);
    }

    #[test]
    fn unprivileged_requests_nothing() {
        let config = RtThreadConfig::unprivileged();
        assert_eq!(config.effective_priority(), 0);
        assert!(!config.lock_memory);
        // Must never fail on a developer machine.
        config.apply_to_current_thread().unwrap();
    }
}
