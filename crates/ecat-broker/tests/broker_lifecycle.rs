//! Broker lifecycle integration tests.
//!
//! Uses the recording harness from `ecat-master` to observe, from outside,
//! what the broker did to the bus and to devices: when activation happened,
//! whether a cycle thread really ran, and in what order teardown executed.

use ecat_broker::{BrokerError, MasterBroker, ReadyOutcome, RtThreadConfig};
use ecat_master::harness::{MockDevice, RecordingBusFactory};
use ecat_master::{Master, MasterConfiguration};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

fn config(interface: &str, cycle_ms: u64) -> MasterConfiguration {
    MasterConfiguration::new(interface, Duration::from_millis(cycle_ms))
}

fn rt() -> RtThreadConfig {
    // Tests must not depend on CAP_SYS_NICE.
    RtThreadConfig::unprivileged()
}

fn wait_for_exchanges(factory: &RecordingBusFactory, at_least: u64) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while factory.exchange_count() < at_least {
        assert!(
            std::time::Instant::now() < deadline,
            "bus never reached {at_least} exchanges"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn two_tenants_share_one_bus_end_to_end() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));
    let log = factory.log();

    // Two callers acquire with identical configuration.
    let first = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let second = broker.acquire(&config("eth0", 1), rt()).unwrap();
    assert_eq!(first.id.raw(), 1);
    assert_eq!(second.id.raw(), 2);
    assert_eq!(broker.outstanding_leases("eth0"), Some(2));
    // One master, one bus.
    assert!(Arc::ptr_eq(&first.master, &second.master));
    assert_eq!(factory.created_count(), 1);

    // Each tenant attaches its own devices on the shared master.
    first
        .master
        .attach_device(MockDevice::new("drive", 1001, log.clone()))
        .unwrap();
    second
        .master
        .attach_device(MockDevice::new("gripper", 1002, log.clone()))
        .unwrap();

    // Barrier: one ready is not enough.
    assert_eq!(broker.mark_ready(&first).unwrap(), ReadyOutcome::Deferred);
    assert!(log.index_of("bus:activate").is_none(), "bus activated early");

    // Second ready trips the barrier, activates, and spawns the thread.
    assert_eq!(broker.mark_ready(&second).unwrap(), ReadyOutcome::Activated);
    assert!(log.index_of("bus:activate").is_some());
    wait_for_exchanges(&factory, 5);

    // First release keeps the bus alive.
    assert!(!broker.release(&first).unwrap());
    assert_eq!(broker.outstanding_leases("eth0"), Some(1));
    assert!(broker.has_master("eth0"));

    // Last release tears everything down.
    assert!(broker.release(&second).unwrap());
    assert!(!broker.has_master("eth0"));
    assert_eq!(broker.outstanding_leases("eth0"), None);

    // Teardown order: devices parked before the bus was released.
    let events = log.snapshot();
    let park = log.index_of("dev:drive:safe-op").expect("no safe-op parking");
    let released = log.index_of("bus:released").expect("bus never released");
    assert!(park < released, "bus released before parking: {events:?}");

    // No further exchanges after teardown: the thread was joined.
    let settled = factory.exchange_count();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(factory.exchange_count(), settled);
}

#[test]
fn mismatched_configuration_warns_and_keeps_the_first() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let first = broker.acquire(&config("eth0", 2), rt()).unwrap();
    let second = broker.acquire(&config("eth0", 1), rt()).unwrap();

    // The existing bus configuration wins.
    assert_eq!(
        second.master.configuration().cycle_time,
        Duration::from_millis(2)
    );
    assert!(Arc::ptr_eq(&first.master, &second.master));
}

#[test]
fn double_ready_is_a_usage_error_without_state_change() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let first = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let second = broker.acquire(&config("eth0", 1), rt()).unwrap();

    assert_eq!(broker.mark_ready(&first).unwrap(), ReadyOutcome::Deferred);
    let err = broker.mark_ready(&first).unwrap_err();
    assert!(matches!(err, BrokerError::AlreadyReady { .. }));
    // Still not activated: the fault mutated nothing.
    assert!(factory.log().index_of("bus:activate").is_none());

    // The rendezvous still completes normally afterwards.
    assert_eq!(broker.mark_ready(&second).unwrap(), ReadyOutcome::Activated);
    drop(broker);
}

#[test]
fn double_release_is_a_usage_error_without_state_change() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let first = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let _second = broker.acquire(&config("eth0", 1), rt()).unwrap();

    assert!(!broker.release(&first).unwrap());
    let err = broker.release(&first).unwrap_err();
    assert!(matches!(err, BrokerError::UnknownHandle { .. }));
    // The other lease is untouched and the interface is still managed.
    assert_eq!(broker.outstanding_leases("eth0"), Some(1));
    assert!(broker.has_master("eth0"));
}

#[test]
fn operations_on_an_unmanaged_interface_are_usage_errors() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    // A master this broker never issued.
    let foreign = Arc::new(Master::new(Arc::new(factory.clone())));
    foreign.load_configuration(config("eth7", 1)).unwrap();
    let bogus = ecat_broker::MasterHandle {
        id: broker.acquire(&config("eth0", 1), rt()).unwrap().id,
        master: foreign.clone(),
    };

    assert!(matches!(
        broker.mark_ready(&bogus).unwrap_err(),
        BrokerError::UnmanagedInterface(ref i) if i == "eth7"
    ));
    assert!(matches!(
        broker.release(&bogus).unwrap_err(),
        BrokerError::UnmanagedInterface(_)
    ));
    assert!(matches!(
        broker.force_shutdown(&foreign).unwrap_err(),
        BrokerError::UnmanagedInterface(_)
    ));
}

#[test]
fn failed_activation_leaves_the_interface_recoverable() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));
    let log = factory.log();

    let handle = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let device = MockDevice::new("drive", 1001, log.clone());
    device.set_fail_configure(true);
    handle.master.attach_device(device.clone()).unwrap();

    let err = broker.mark_ready(&handle).unwrap_err();
    assert!(matches!(err, BrokerError::Activation { .. }));
    // No cycle thread was spawned and the interface is still registered.
    assert!(broker.has_master("eth0"));
    assert_eq!(factory.exchange_count(), 0);

    // Fix the device and retry the same rendezvous.
    device.set_fail_configure(false);
    assert_eq!(broker.mark_ready(&handle).unwrap(), ReadyOutcome::Activated);
    wait_for_exchanges(&factory, 3);
    assert!(broker.release(&handle).unwrap());
}

#[test]
fn late_joiner_attaches_to_an_already_cycling_bus() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let first = broker.acquire(&config("eth0", 1), rt()).unwrap();
    assert_eq!(broker.mark_ready(&first).unwrap(), ReadyOutcome::Activated);
    wait_for_exchanges(&factory, 2);

    // A tenant arriving after activation does not re-trip the barrier.
    let late = broker.acquire(&config("eth0", 1), rt()).unwrap();
    assert_eq!(late.id.raw(), 2);
    assert_eq!(broker.mark_ready(&late).unwrap(), ReadyOutcome::Activated);

    assert!(!broker.release(&first).unwrap());
    assert!(broker.release(&late).unwrap());
    assert!(!broker.has_master("eth0"));
}

#[test]
fn releasing_an_unready_straggler_completes_the_rendezvous() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let ready = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let straggler = broker.acquire(&config("eth0", 1), rt()).unwrap();

    assert_eq!(broker.mark_ready(&ready).unwrap(), ReadyOutcome::Deferred);
    assert!(factory.log().index_of("bus:activate").is_none());

    // The straggler gives up; the remaining tenant is already ready, so the
    // bus comes up for it.
    assert!(!broker.release(&straggler).unwrap());
    wait_for_exchanges(&factory, 2);

    assert!(broker.release(&ready).unwrap());
}

#[test]
fn force_shutdown_bypasses_the_lease_count() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));
    let log = factory.log();

    let first = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let second = broker.acquire(&config("eth0", 1), rt()).unwrap();
    first
        .master
        .attach_device(MockDevice::new("drive", 1001, log.clone()))
        .unwrap();
    broker.mark_ready(&first).unwrap();
    broker.mark_ready(&second).unwrap();
    wait_for_exchanges(&factory, 2);

    broker.force_shutdown(&first.master).unwrap();
    assert!(!broker.has_master("eth0"));
    assert!(log.index_of("bus:released").is_some());

    // Surviving handles are now orphaned, as documented.
    assert!(matches!(
        broker.release(&second).unwrap_err(),
        BrokerError::UnmanagedInterface(_)
    ));
}

#[test]
fn independent_interfaces_get_independent_masters() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let a = broker.acquire(&config("eth0", 1), rt()).unwrap();
    let b = broker.acquire(&config("eth1", 1), rt()).unwrap();
    assert!(!Arc::ptr_eq(&a.master, &b.master));
    assert_eq!(factory.created_count(), 2);
    // Ids are per interface.
    assert_eq!(a.id.raw(), 1);
    assert_eq!(b.id.raw(), 1);

    assert!(broker.release(&a).unwrap());
    assert!(broker.has_master("eth1"));
    assert!(broker.release(&b).unwrap());
}

#[test]
fn dropping_the_broker_tears_down_remaining_buses() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let log = factory.log();
    {
        let broker = MasterBroker::new(Arc::new(factory.clone()));
        let handle = broker.acquire(&config("eth0", 1), rt()).unwrap();
        handle
            .master
            .attach_device(MockDevice::new("drive", 1001, log.clone()))
            .unwrap();
        broker.mark_ready(&handle).unwrap();
        wait_for_exchanges(&factory, 2);
        // Handle intentionally never released.
    }
    // Drop joined the thread and shut the bus down.
    assert!(log.index_of("dev:drive:safe-op").is_some());
    assert!(log.index_of("bus:released").is_some());
    let settled = factory.exchange_count();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(factory.exchange_count(), settled);
}

#[test]
fn registry_recreation_restarts_handle_ids() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    let first = broker.acquire(&config("eth0", 1), rt()).unwrap();
    assert_eq!(first.id.raw(), 1);
    broker.mark_ready(&first).unwrap();
    assert!(broker.release(&first).unwrap());

    // A fresh entry starts counting from 1 again.
    let reborn = broker.acquire(&config("eth0", 1), rt()).unwrap();
    assert_eq!(reborn.id.raw(), 1);
    assert_eq!(factory.created_count(), 2);
    broker.mark_ready(&reborn).unwrap();
    assert!(broker.release(&reborn).unwrap());
}

#[test]
fn self_paced_thread_converges_to_the_configured_rate() {
    init_tracing();
    let factory = RecordingBusFactory::new();
    let broker = MasterBroker::new(Arc::new(factory.clone()));

    // 2ms cycle; let the thread run for ~100ms.
    let handle = broker.acquire(&config("eth0", 2), rt()).unwrap();
    broker.mark_ready(&handle).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let exchanges = factory.exchange_count();
    broker.release(&handle).unwrap();

    // Nominal is 50 cycles; accept a generous band for loaded test hosts,
    // but rule out both a stalled loop and an unpaced spin.
    assert!(exchanges >= 20, "only {exchanges} cycles in 100ms");
    assert!(exchanges <= 75, "{exchanges} cycles in 100ms is unpaced");
}
