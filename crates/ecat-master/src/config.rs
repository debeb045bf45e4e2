//! Master configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters binding a master to one bus.
///
/// The interface name doubles as the registry key under which co-tenants
/// share a master; structural equality is what the broker uses to detect
/// mismatched concurrent requests for the same bus. Immutable once loaded
/// into a [`crate::Master`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfiguration {
    /// Network interface the bus hangs off (e.g. `eth0`).
    pub interface: String,
    /// Process-data cycle period.
    pub cycle_time: Duration,
    /// Offset of the slaves' sync0 pulse relative to the cycle start.
    pub sync0_shift: Duration,
    /// How long to wait for slaves to answer enumeration during activation.
    pub slave_discover_timeout: Duration,
    /// Warn when the achieved update rate falls below this percentage of the
    /// configured rate.
    pub low_rate_warn_threshold_percent: u8,
}

impl Default for MasterConfiguration {
    fn default() -> Self {
        Self {
            interface: String::new(),
            cycle_time: Duration::from_millis(1),
            sync0_shift: Duration::ZERO,
            slave_discover_timeout: Duration::from_secs(3),
            low_rate_warn_threshold_percent: 50,
        }
    }
}

impl MasterConfiguration {
    /// Configuration for `interface` with the given cycle time and default
    /// tuning values.
    pub fn new(interface: impl Into<String>, cycle_time: Duration) -> Self {
        Self {
            interface: interface.into(),
            cycle_time,
            ..Self::default()
        }
    }

    /// Check the configuration for values no bus can run with.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interface.is_empty() {
            return Err(ConfigurationError::EmptyInterface);
        }
        if self.cycle_time.is_zero() {
            return Err(ConfigurationError::ZeroCycleTime);
        }
        if self.sync0_shift >= self.cycle_time {
            return Err(ConfigurationError::ShiftExceedsCycle {
                shift_us: self.sync0_shift.as_micros() as u64,
                cycle_us: self.cycle_time.as_micros() as u64,
            });
        }
        if self.low_rate_warn_threshold_percent > 100 {
            return Err(ConfigurationError::ThresholdOutOfRange(
                self.low_rate_warn_threshold_percent,
            ));
        }
        Ok(())
    }
}
