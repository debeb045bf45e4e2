//! One-shot startup rendezvous for one interface.
//!
//! Every lease issued for an interface registers here; the bus may only be
//! activated once all registered leases have signalled ready. The barrier is
//! one-shot: after it has tripped, leases issued later join an already
//! cycling bus and never cause a second activation.

use crate::handle::HandleId;
use std::collections::BTreeMap;

/// Result of marking one handle ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierState {
    /// At least one registered handle has not signalled yet; activation is
    /// deferred. Expected, frequent control flow — not an error.
    Deferred,
    /// Every registered handle has signalled (or the barrier had already
    /// tripped); the caller may activate.
    Complete,
}

/// Contract violations when marking ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierFault {
    /// The handle already signalled ready; readiness is single-use.
    AlreadyReady(HandleId),
    /// The handle is not registered at this barrier.
    Unknown(HandleId),
}

#[derive(Debug, Default)]
pub(crate) struct ReadyBarrier {
    ready: BTreeMap<HandleId, bool>,
    tripped: bool,
}

impl ReadyBarrier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a newly issued lease as not ready.
    pub(crate) fn register(&mut self, id: HandleId) {
        self.ready.insert(id, false);
    }

    /// Remove a released lease from the rendezvous.
    pub(crate) fn deregister(&mut self, id: HandleId) {
        self.ready.remove(&id);
    }

    /// Record one handle's readiness.
    pub(crate) fn mark_ready(&mut self, id: HandleId) -> Result<BarrierState, BarrierFault> {
        match self.ready.get_mut(&id) {
            None => return Err(BarrierFault::Unknown(id)),
            Some(true) => return Err(BarrierFault::AlreadyReady(id)),
            Some(flag) => *flag = true,
        }
        if self.is_complete() {
            Ok(BarrierState::Complete)
        } else {
            Ok(BarrierState::Deferred)
        }
    }

    /// Roll back one handle's readiness after a failed activation so the
    /// rendezvous can be retried.
    pub(crate) fn rewind(&mut self, id: HandleId) {
        if let Some(flag) = self.ready.get_mut(&id) {
            *flag = false;
        }
    }

    /// True once activation has happened; later registrants join an active
    /// bus and must not re-trip.
    pub(crate) fn tripped(&self) -> bool {
        self.tripped
    }

    /// Latch the barrier after a successful activation.
    pub(crate) fn mark_tripped(&mut self) {
        self.tripped = true;
    }

    /// All currently registered handles are ready (and there is at least
    /// one, or the barrier already tripped).
    pub(crate) fn is_complete(&self) -> bool {
        if self.tripped {
            return true;
        }
        !self.ready.is_empty() && self.ready.values().all(|ready| *ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> HandleId {
        HandleId::new(raw)
    }

    #[test]
    fn single_handle_completes_immediately() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        assert_eq!(barrier.mark_ready(id(1)), Ok(BarrierState::Complete));
    }

    #[test]
    fn waits_for_every_registered_handle() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        barrier.register(id(2));
        assert_eq!(barrier.mark_ready(id(1)), Ok(BarrierState::Deferred));
        assert_eq!(barrier.mark_ready(id(2)), Ok(BarrierState::Complete));
    }

    #[test]
    fn double_ready_is_a_fault() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        barrier.register(id(2));
        barrier.mark_ready(id(1)).unwrap();
        assert_eq!(
            barrier.mark_ready(id(1)),
            Err(BarrierFault::AlreadyReady(id(1)))
        );
        // The fault did not mutate the rendezvous.
        assert!(!barrier.is_complete());
    }

    #[test]
    fn unknown_handle_is_a_fault() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        assert_eq!(barrier.mark_ready(id(9)), Err(BarrierFault::Unknown(id(9))));
    }

    #[test]
    fn deregistering_the_last_straggler_completes_the_rendezvous() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        barrier.register(id(2));
        barrier.mark_ready(id(1)).unwrap();
        assert!(!barrier.is_complete());
        barrier.deregister(id(2));
        assert!(barrier.is_complete());
    }

    #[test]
    fn empty_barrier_is_not_complete() {
        let barrier = ReadyBarrier::new();
        assert!(!barrier.is_complete());
    }

    #[test]
    fn once_tripped_late_joiners_see_complete() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        barrier.mark_ready(id(1)).unwrap();
        barrier.mark_tripped();

        barrier.register(id(2));
        assert_eq!(barrier.mark_ready(id(2)), Ok(BarrierState::Complete));
        assert!(barrier.tripped());
    }

    #[test]
    fn rewind_allows_a_retry() {
        let mut barrier = ReadyBarrier::new();
        barrier.register(id(1));
        barrier.mark_ready(id(1)).unwrap();
        barrier.rewind(id(1));
        assert_eq!(barrier.mark_ready(id(1)), Ok(BarrierState::Complete));
    }
}
