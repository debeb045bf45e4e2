//! Shared-bus broker for EtherCAT masters.
//!
//! Several independent components in one process may each want to drive
//! devices on the *same* physical bus. Only one master — and one cycle
//! thread — may exist per network interface, so this crate brokers shared
//! access: callers lease a master per interface, attach their devices, and
//! signal readiness; once every outstanding lease has signalled, the broker
//! activates the bus and starts one real-time cycle thread for it. Releasing
//! the last lease tears the bus down in a fixed order (abort → join → park
//! devices → release bus → unregister).
//!
//! The broker is an explicitly constructed service, not a global singleton:
//! build one [`MasterBroker`], share it via `Arc`, and drop it to force an
//! orderly shutdown of everything it still manages.
//!
//! ```no_run
//! use ecat_broker::{MasterBroker, ReadyOutcome};
//! use ecat_master::MasterConfiguration;
//! use ecat_scheduler::RtThreadConfig;
//! use std::time::Duration;
//! # fn factory() -> std::sync::Arc<dyn ecat_master::BusFactory> { unimplemented!() }
//!
//! let broker = MasterBroker::new(factory());
//! let config = MasterConfiguration::new("eth0", Duration::from_millis(1));
//! let handle = broker.acquire(&config, RtThreadConfig::default())?;
//! // attach devices on handle.master, then:
//! match broker.mark_ready(&handle)? {
//!     ReadyOutcome::Deferred => { /* other co-tenants still configuring */ }
//!     ReadyOutcome::Activated => { /* bus is cycling */ }
//! }
//! // ... later
//! broker.release(&handle)?;
//! # Ok::<(), ecat_broker::BrokerError>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_must_use)]

mod barrier;
mod broker;
mod error;
mod handle;
mod lease;

pub use broker::{MasterBroker, ReadyOutcome};
pub use error::BrokerError;
pub use handle::{HandleId, MasterHandle};

// Callers configuring cycle threads need this alongside the broker API.
pub use ecat_scheduler::RtThreadConfig;
