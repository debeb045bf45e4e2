//! Broker error types.
//!
//! Usage violations (unmanaged interface, double ready, double release) and
//! fatal activation failures land here. "Not everyone is ready yet" is *not*
//! an error — that is [`crate::ReadyOutcome::Deferred`].

use crate::handle::HandleId;
use ecat_master::MasterError;

/// Errors surfaced by [`crate::MasterBroker`] operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The handle's interface is not managed by this broker (never acquired,
    /// already torn down, or force-shut).
    #[error("no master managed for interface {0}")]
    UnmanagedInterface(String),

    /// The handle already signalled ready; readiness is single-use.
    #[error("handle {id} on interface {interface} was already marked ready")]
    AlreadyReady {
        /// Offending handle id.
        id: HandleId,
        /// Interface name.
        interface: String,
    },

    /// The handle is not outstanding on this interface (double release, or a
    /// stale id from an earlier registry entry).
    #[error("handle {id} is not outstanding on interface {interface}")]
    UnknownHandle {
        /// Offending handle id.
        id: HandleId,
        /// Interface name.
        interface: String,
    },

    /// The interface is mid-teardown; acquire again once it is gone.
    #[error("interface {0} is shutting down")]
    ShuttingDown(String),

    /// Creating or configuring the master for a first acquisition failed.
    #[error("could not set up a master for interface {interface}")]
    Setup {
        /// Interface name.
        interface: String,
        /// Underlying master error.
        #[source]
        source: MasterError,
    },

    /// The ready barrier tripped but bus activation failed. The interface
    /// stays registered and non-active; the failing handle may retry.
    #[error("bus activation failed on interface {interface}")]
    Activation {
        /// Interface name.
        interface: String,
        /// Underlying master error.
        #[source]
        source: MasterError,
    },

    /// The cycle thread could not be spawned after a successful activation.
    #[error("could not spawn cycle thread for interface {interface}: {reason}")]
    ThreadSpawn {
        /// Interface name.
        interface: String,
        /// OS-level reason.
        reason: String,
    },
}
