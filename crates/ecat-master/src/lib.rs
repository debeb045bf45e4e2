//! EtherCAT master core: bus lifecycle, cyclic update, distributed clocks.
//!
//! One [`Master`] owns one bus connection (one network interface) and the
//! ordered set of slave [`Device`]s attached to it. The master drives bus
//! activation, the per-cycle process-data exchange, distributed-clock
//! alignment, and the staged shutdown path that parks devices in their safe
//! state before the bus is released.
//!
//! The low-level transport is deliberately opaque: the master talks to it
//! through the [`Bus`] trait and obtains it from a [`BusFactory`], so the
//! same lifecycle code runs against real fieldbus hardware and against the
//! recording doubles in [`harness`].
//!
//! Multi-tenant access to one master (several components driving devices on
//! the same physical bus) is coordinated one level up, by the broker crate;
//! everything here is written so that a shared `Arc<Master>` is safe to use
//! from the cycling thread and from caller threads at the same time.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_must_use)]

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod master;

#[cfg(any(test, feature = "harness"))]
pub mod harness;

pub use bus::{Bus, BusFactory};
pub use config::MasterConfiguration;
pub use device::Device;
pub use error::{BusError, ConfigurationError, DeviceError, MasterError};
pub use master::{CycleReport, Master, MasterPhase, UpdateMode};
