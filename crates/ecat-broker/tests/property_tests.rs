//! Property-based tests for lease bookkeeping and the ready barrier.
//!
//! Drives the public broker API with arbitrary acquire/release sequences and
//! checks that the outstanding-lease count always equals acquisitions minus
//! releases, that exactly one bus exists per registry-entry lifetime, and
//! that activation never happens before every issued handle has signalled.

use ecat_broker::{BrokerError, MasterBroker, MasterHandle, ReadyOutcome, RtThreadConfig};
use ecat_master::MasterConfiguration;
use ecat_master::harness::RecordingBusFactory;
use quickcheck_macros::quickcheck;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

fn config() -> MasterConfiguration {
    MasterConfiguration::new("eth0", Duration::from_millis(1))
}

fn rt() -> RtThreadConfig {
    RtThreadConfig::unprivileged()
}

#[quickcheck]
fn lease_count_tracks_acquisitions_minus_releases(ops: Vec<bool>) {
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));
    let mut outstanding: VecDeque<MasterHandle> = VecDeque::new();
    let mut entry_creations = 0;

    for acquire in ops {
        if acquire {
            if outstanding.is_empty() {
                entry_creations += 1;
            }
            outstanding.push_back(broker.acquire(&config(), rt()).unwrap());
        } else if let Some(handle) = outstanding.pop_front() {
            let torn_down = broker.release(&handle).unwrap();
            assert_eq!(torn_down, outstanding.is_empty());
        }

        assert_eq!(broker.has_master("eth0"), !outstanding.is_empty());
        if outstanding.is_empty() {
            assert_eq!(broker.outstanding_leases("eth0"), None);
        } else {
            assert_eq!(broker.outstanding_leases("eth0"), Some(outstanding.len()));
        }
    }

    // One bus connection per lifetime of the registry entry.
    assert_eq!(factory.created_count(), entry_creations);
}

#[quickcheck]
fn marking_fewer_than_all_handles_ready_never_activates(extra: u8) {
    let count = usize::from(extra % 6) + 2;
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let handles: Vec<MasterHandle> = (0..count)
        .map(|_| broker.acquire(&config(), rt()).unwrap())
        .collect();

    for handle in handles.iter().take(count - 1) {
        assert_eq!(broker.mark_ready(handle).unwrap(), ReadyOutcome::Deferred);
        assert!(
            factory.log().index_of("bus:activate").is_none(),
            "activated with a handle still unready"
        );
    }

    assert_eq!(
        broker.mark_ready(&handles[count - 1]).unwrap(),
        ReadyOutcome::Activated
    );
    assert!(factory.log().index_of("bus:activate").is_some());

    for (released, handle) in handles.iter().enumerate() {
        assert_eq!(broker.release(handle).unwrap(), released + 1 == count);
    }
    assert!(!broker.has_master("eth0"));
}

#[quickcheck]
fn stale_handles_from_a_previous_entry_cannot_release_fresh_leases(extra: u8) {
    let count = usize::from(extra % 6) + 2;
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    // First incarnation of the interface: issue and release every lease.
    let stale: Vec<MasterHandle> = (0..count)
        .map(|_| broker.acquire(&config(), rt()).unwrap())
        .collect();
    for (released, handle) in stale.iter().enumerate() {
        assert_eq!(broker.release(handle).unwrap(), released + 1 == count);
    }

    // Second incarnation has issued only id 1.
    let fresh = broker.acquire(&config(), rt()).unwrap();

    // Stale ids beyond what the fresh entry has issued are rejected and
    // mutate nothing. (A stale id 1 is indistinguishable from the fresh
    // lease; handles are documented as not outliving their entry.)
    for handle in stale.iter().skip(1) {
        assert!(matches!(
            broker.release(handle).unwrap_err(),
            BrokerError::UnknownHandle { .. }
        ));
        assert_eq!(broker.outstanding_leases("eth0"), Some(1));
    }

    assert!(broker.release(&fresh).unwrap());
}
