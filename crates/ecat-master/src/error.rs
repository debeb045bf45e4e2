//! Error types for the master core.
//!
//! Three layers, matching who can do something about the failure:
//! [`ConfigurationError`] and the usage variants of [`MasterError`] point at
//! caller bugs; [`BusError`] and [`DeviceError`] are operational failures at
//! the transport and slave boundaries.

use crate::master::MasterPhase;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The network interface name is empty.
    #[error("network interface must not be empty")]
    EmptyInterface,

    /// The cycle time is zero.
    #[error("cycle time must be non-zero")]
    ZeroCycleTime,

    /// The sync0 shift does not fit into the cycle.
    #[error("sync0 shift {shift_us}us does not fit into cycle time {cycle_us}us")]
    ShiftExceedsCycle {
        /// Configured shift in microseconds.
        shift_us: u64,
        /// Configured cycle time in microseconds.
        cycle_us: u64,
    },

    /// The low-rate warning threshold is not a percentage.
    #[error("rate warn threshold {0}% exceeds 100%")]
    ThresholdOutOfRange(u8),
}

/// Failures at the bus transport boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The network interface could not be opened.
    #[error("failed to open network interface {interface}: {reason}")]
    OpenFailed {
        /// Interface name.
        interface: String,
        /// Transport-level reason.
        reason: String,
    },

    /// Activation (slave enumeration, state ramp-up) failed.
    #[error("bus activation failed on {interface}: {reason}")]
    ActivationFailed {
        /// Interface name.
        interface: String,
        /// Transport-level reason.
        reason: String,
    },

    /// A cyclic process-data round-trip failed.
    #[error("process data exchange failed: {0}")]
    ExchangeFailed(String),

    /// Programming a slave's distributed clock failed.
    #[error("distributed clock programming failed for slave {address}: {reason}")]
    ClockProgrammingFailed {
        /// Slave bus address.
        address: u32,
        /// Transport-level reason.
        reason: String,
    },
}

/// Failures reported by a slave device implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    /// The device rejected or failed its configuration sequence.
    #[error("device configuration failed: {0}")]
    ConfigurationFailed(String),

    /// A state transition (operational / safe-operational) failed.
    #[error("transition to {target} failed: {reason}")]
    StateTransitionFailed {
        /// Target state name.
        target: &'static str,
        /// Device-level reason.
        reason: String,
    },

    /// The per-cycle update hook faulted.
    #[error("cycle update fault: {0}")]
    UpdateFault(String),
}

/// Errors surfaced by [`crate::Master`] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MasterError {
    /// The operation requires an active (cycling) master.
    #[error("master on {interface} is not active (phase {phase:?})")]
    NotActive {
        /// Interface name.
        interface: String,
        /// Phase the master was actually in.
        phase: MasterPhase,
    },

    /// `create_bus` was called twice.
    #[error("bus was already created for interface {0}")]
    BusAlreadyCreated(String),

    /// An operation needed the bus before `create_bus` was called.
    #[error("no bus has been created for interface {0}")]
    BusNotCreated(String),

    /// No configuration has been loaded into the master.
    #[error("no configuration loaded for this master")]
    NotConfigured,

    /// A device with the same name is already attached.
    #[error("a device named {0} is already attached")]
    DuplicateDevice(String),

    /// Devices cannot be attached once the bus is cycling.
    #[error("cannot attach device {device}: master on {interface} is already active")]
    AttachAfterActivation {
        /// Device name.
        device: String,
        /// Interface name.
        interface: String,
    },

    /// Startup was requested from a phase it cannot run in.
    #[error("master on {interface} cannot start up from phase {phase:?}")]
    StartupFromWrongPhase {
        /// Interface name.
        interface: String,
        /// Phase the master was in.
        phase: MasterPhase,
    },

    /// The master was already shut down.
    #[error("master on {0} is already closed")]
    AlreadyClosed(String),

    /// One or more devices failed their startup sequence. Every device was
    /// still attempted; the list carries the full failure set.
    #[error("devices failed startup on {interface}: {devices:?}")]
    StartupFailures {
        /// Interface name.
        interface: String,
        /// Names of every device that failed.
        devices: Vec<String>,
    },

    /// One or more slave clocks could not be aligned. Every address was
    /// still attempted.
    #[error("distributed clock sync failed on {interface} for addresses {addresses:?}")]
    ClockSyncFailures {
        /// Interface name.
        interface: String,
        /// Every address that failed.
        addresses: Vec<u32>,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A transport-level fault.
    #[error("bus fault on {interface}: {source}")]
    Bus {
        /// Interface name.
        interface: String,
        /// Underlying transport error.
        #[source]
        source: BusError,
    },
}
