//! Caller-visible lease tokens.

use ecat_master::Master;
use std::fmt;
use std::sync::Arc;

/// Identifier of one lease on one interface's master.
///
/// Ids are assigned in acquisition order starting at 1 and are unique for
/// the lifetime of that interface's registry entry; once the entry is erased
/// and recreated, ids start over (handles never outlive that cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u32);

impl HandleId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric id.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One lease on a shared master.
///
/// The holder attaches its devices directly on `master`, marks the handle
/// ready exactly once, and releases it exactly once; the broker rejects
/// double use.
#[derive(Clone)]
pub struct MasterHandle {
    /// Lease id within this interface's registry entry.
    pub id: HandleId,
    /// The shared master for the interface.
    pub master: Arc<Master>,
}

impl MasterHandle {
    /// Interface this handle's master is bound to.
    pub fn interface(&self) -> String {
        self.master.configuration().interface
    }
}

impl fmt::Debug for MasterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterHandle")
            .field("id", &self.id)
            .field("interface", &self.interface())
            .finish()
    }
}
