//! Slave device boundary.

use crate::error::DeviceError;

/// One slave endpoint on the bus.
///
/// The master calls the lifecycle methods in attachment order during startup
/// and shutdown, and [`Device::update_cycle`] once per bus cycle.
///
/// # Synchronization contract
///
/// A device is shared between the bus cycle thread (which calls
/// `update_cycle`) and the component that attached it (which reads and
/// writes process data directly on its own threads). Implementations must
/// internally synchronize that access — a lock around their state, or
/// atomically swapped double-buffered process-data images. The `Send + Sync`
/// bounds are the floor, not the whole contract.
pub trait Device: Send + Sync {
    /// Device name, unique among the devices attached to one master.
    fn name(&self) -> &str;

    /// The slave's station address on the bus, used to program its
    /// distributed clock.
    fn address(&self) -> u32;

    /// Run the device's configuration sequence (PDO mapping, startup SDOs).
    fn configure(&self) -> Result<(), DeviceError>;

    /// Transition the slave to the operational state.
    fn set_operational(&self) -> Result<(), DeviceError>;

    /// Transition the slave to the safe-operational state, parking outputs.
    fn set_safe_operational(&self) -> Result<(), DeviceError>;

    /// Per-cycle hook, called after every process-data exchange.
    ///
    /// Must not panic; a returned error marks this device faulted for the
    /// cycle without stopping the rest of the bus.
    fn update_cycle(&self) -> Result<(), DeviceError>;
}
