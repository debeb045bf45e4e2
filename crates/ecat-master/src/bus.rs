//! Transport boundary.
//!
//! The master drives the wire through these traits and nothing else; frame
//! formats, descriptor rings, and vendor quirks all live behind them.

use crate::config::MasterConfiguration;
use crate::error::BusError;
use std::time::Duration;

/// One open bus connection, exclusively owned by one master.
pub trait Bus: Send {
    /// Interface name this bus is bound to.
    fn name(&self) -> &str;

    /// Bring the bus up: enumerate slaves and ramp them to a state where
    /// process data can flow.
    fn activate(&mut self) -> Result<(), BusError>;

    /// Stop cyclic operation on the wire. The connection stays open; the bus
    /// is released by dropping it. Must be idempotent: the cycle thread
    /// deactivates on its way out and a later shutdown may deactivate again.
    fn deactivate(&mut self);

    /// Perform one cyclic process-data round-trip.
    fn exchange_process_data(&mut self) -> Result<(), BusError>;

    /// Program one slave's distributed-clock sync0 signal so its local cycle
    /// fires in phase with the master cycle.
    fn configure_sync0(
        &mut self,
        address: u32,
        cycle_time: Duration,
        shift: Duration,
    ) -> Result<(), BusError>;
}

/// Creates [`Bus`] connections for network interfaces.
///
/// Injected into masters so the orchestration layer never names a concrete
/// transport. Exactly one bus per interface is created over a master's life.
pub trait BusFactory: Send + Sync {
    /// Open a bus on the configured interface.
    ///
    /// The full configuration is passed through so the transport can honor
    /// tuning values the core never interprets itself, like the slave
    /// discovery timeout.
    fn create(&self, config: &MasterConfiguration) -> Result<Box<dyn Bus>, BusError>;
}
