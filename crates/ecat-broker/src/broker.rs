//! The broker service: registry, activation, cycle threads, teardown.

use crate::barrier::{BarrierFault, BarrierState, ReadyBarrier};
use crate::error::BrokerError;
use crate::handle::MasterHandle;
use crate::lease::LeaseState;
use ecat_master::{BusFactory, Master, MasterConfiguration, MasterPhase, UpdateMode};
use ecat_scheduler::RtThreadConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of [`MasterBroker::mark_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Other co-tenants have not signalled yet; the bus stays down for now.
    Deferred,
    /// The bus is active and cycling (activated by this call, or already
    /// active when a late co-tenant signalled).
    Activated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    AwaitingReady,
    Active,
    TearingDown,
}

struct BusEntry {
    master: Arc<Master>,
    lease: LeaseState,
    barrier: ReadyBarrier,
    rt: RtThreadConfig,
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    state: EntryState,
}

impl BusEntry {
    fn new(master: Arc<Master>, rt: RtThreadConfig) -> Self {
        Self {
            master,
            lease: LeaseState::new(),
            barrier: ReadyBarrier::new(),
            rt,
            abort: Arc::new(AtomicBool::new(false)),
            thread: None,
            state: EntryState::AwaitingReady,
        }
    }
}

/// Everything teardown needs, taken out of the entry while the registry
/// lock is held so the blocking join can run without it.
struct Teardown {
    master: Arc<Master>,
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Brokers shared access to one master per network interface.
///
/// All bookkeeping (acquire / ready / release) is serialized by one registry
/// lock; the lock is never held across a cycle or across the join performed
/// during teardown, so shutting one bus down does not stall callers working
/// on other buses.
pub struct MasterBroker {
    factory: Arc<dyn BusFactory>,
    registry: Mutex<HashMap<String, BusEntry>>,
}

impl MasterBroker {
    /// Broker obtaining bus connections from `factory`.
    pub fn new(factory: Arc<dyn BusFactory>) -> Self {
        Self {
            factory,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Lease the master for `config`'s interface, creating it on first use.
    ///
    /// The first acquisition for an interface creates the master and opens
    /// its bus; later acquisitions reuse it. A configuration differing from
    /// the one already bound is logged as a warning and the existing
    /// configuration wins — late co-tenants adapt, they are not rejected.
    /// The returned handle carries the shared master; attach devices on it
    /// directly, then call [`MasterBroker::mark_ready`].
    ///
    /// # Errors
    ///
    /// [`BrokerError::Setup`] when the first acquisition cannot create the
    /// bus; [`BrokerError::ShuttingDown`] while the interface's previous
    /// incarnation is mid-teardown.
    pub fn acquire(
        &self,
        config: &MasterConfiguration,
        rt: RtThreadConfig,
    ) -> Result<MasterHandle, BrokerError> {
        let interface = config.interface.clone();
        let mut registry = self.registry.lock();
        let entry = match registry.entry(interface.clone()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.state == EntryState::TearingDown {
                    return Err(BrokerError::ShuttingDown(interface));
                }
                if *config != entry.master.configuration() {
                    warn!(
                        interface = %interface,
                        "configurations do not match for this bus; keeping the existing one"
                    );
                }
                entry
            }
            Entry::Vacant(vacant) => {
                info!(interface = %interface, "setting up new master");
                let master = Arc::new(Master::new(self.factory.clone()));
                master
                    .load_configuration(config.clone())
                    .map_err(|source| BrokerError::Setup {
                        interface: interface.clone(),
                        source,
                    })?;
                master.create_bus().map_err(|source| BrokerError::Setup {
                    interface: interface.clone(),
                    source,
                })?;
                vacant.insert(BusEntry::new(master, rt))
            }
        };

        let id = entry.lease.issue();
        entry.barrier.register(id);
        debug!(interface = %interface, handle = %id, "lease issued");
        Ok(MasterHandle {
            id,
            master: entry.master.clone(),
        })
    }

    /// Signal that this handle's holder has finished attaching its devices.
    ///
    /// Readiness is single-use per handle. Once every outstanding lease on
    /// the interface has signalled, the bus is started (`startup` on the
    /// master, devices to operational, clocks aligned) and the dedicated
    /// cycle thread is spawned — a one-shot rendezvous: handles acquired
    /// after activation get [`ReadyOutcome::Activated`] from their own call
    /// and join a bus that is already cycling.
    ///
    /// # Errors
    ///
    /// Usage errors ([`BrokerError::UnmanagedInterface`],
    /// [`BrokerError::AlreadyReady`], [`BrokerError::UnknownHandle`]) mutate
    /// nothing. [`BrokerError::Activation`] means the barrier tripped but
    /// startup failed; the interface stays registered and non-active, and
    /// this handle's readiness is rolled back so the rendezvous can be
    /// retried.
    pub fn mark_ready(&self, handle: &MasterHandle) -> Result<ReadyOutcome, BrokerError> {
        let interface = handle.interface();
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(&interface)
            .ok_or_else(|| BrokerError::UnmanagedInterface(interface.clone()))?;
        if entry.state == EntryState::TearingDown {
            return Err(BrokerError::ShuttingDown(interface));
        }

        match entry.barrier.mark_ready(handle.id) {
            Err(BarrierFault::AlreadyReady(id)) => {
                return Err(BrokerError::AlreadyReady { id, interface });
            }
            Err(BarrierFault::Unknown(id)) => {
                return Err(BrokerError::UnknownHandle { id, interface });
            }
            Ok(BarrierState::Deferred) => {
                info!(interface = %interface, handle = %handle.id, "not all handles ready, deferring bus activation");
                return Ok(ReadyOutcome::Deferred);
            }
            Ok(BarrierState::Complete) => {}
        }

        if entry.barrier.tripped() {
            // Late co-tenant joining a bus that is already cycling.
            info!(interface = %interface, handle = %handle.id, "joining already active bus");
            return Ok(ReadyOutcome::Activated);
        }

        match Self::activate_entry(&interface, entry) {
            Ok(()) => Ok(ReadyOutcome::Activated),
            Err(err) => {
                entry.barrier.rewind(handle.id);
                Err(err)
            }
        }
    }

    /// Return a lease. Releasing the last outstanding lease for an
    /// interface tears the bus down (abort → join → park devices → release
    /// bus → unregister) and returns `true`; otherwise `false`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnmanagedInterface`] or
    /// [`BrokerError::UnknownHandle`] (double release) — neither mutates any
    /// state.
    pub fn release(&self, handle: &MasterHandle) -> Result<bool, BrokerError> {
        let interface = handle.interface();
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(&interface)
            .ok_or_else(|| BrokerError::UnmanagedInterface(interface.clone()))?;
        if entry.state == EntryState::TearingDown {
            return Err(BrokerError::ShuttingDown(interface));
        }

        entry
            .lease
            .release(handle.id)
            .map_err(|_| BrokerError::UnknownHandle {
                id: handle.id,
                interface: interface.clone(),
            })?;
        entry.barrier.deregister(handle.id);

        if entry.lease.outstanding() == 0 {
            info!(interface = %interface, "last lease released, shutting down bus");
            let teardown = Self::park_for_teardown(entry);
            drop(registry);
            self.run_teardown(&interface, teardown);
            return Ok(true);
        }

        // Releasing the last straggler can complete the rendezvous for the
        // co-tenants that are already ready.
        if entry.state == EntryState::AwaitingReady && entry.barrier.is_complete() {
            if let Err(err) = Self::activate_entry(&interface, entry) {
                error!(
                    interface = %interface,
                    error = %err,
                    "bus activation failed after a release completed the rendezvous"
                );
            }
        }
        Ok(false)
    }

    /// Tear an interface down immediately, ignoring outstanding leases.
    ///
    /// Unsafe for every other live co-tenant — their next broker call on
    /// this interface fails with [`BrokerError::UnmanagedInterface`].
    /// Reserved for emergency-stop paths where parking the physical bus
    /// outweighs protecting co-tenants.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnmanagedInterface`] when the master is not managed
    /// here.
    pub fn force_shutdown(&self, master: &Arc<Master>) -> Result<(), BrokerError> {
        let interface = master.configuration().interface;
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(&interface)
            .ok_or_else(|| BrokerError::UnmanagedInterface(interface.clone()))?;
        if entry.state == EntryState::TearingDown {
            return Err(BrokerError::ShuttingDown(interface));
        }
        warn!(
            interface = %interface,
            outstanding = entry.lease.outstanding(),
            "forced shutdown; remaining co-tenants of this bus will fail"
        );
        let teardown = Self::park_for_teardown(entry);
        drop(registry);
        self.run_teardown(&interface, teardown);
        Ok(())
    }

    /// True while a master for this interface is registered (including
    /// mid-teardown; the entry disappears once the bus is released).
    pub fn has_master(&self, interface: &str) -> bool {
        self.registry.lock().contains_key(interface)
    }

    /// Number of outstanding leases for an interface, if managed.
    pub fn outstanding_leases(&self, interface: &str) -> Option<usize> {
        self.registry
            .lock()
            .get(interface)
            .map(|entry| entry.lease.outstanding())
    }

    fn activate_entry(interface: &str, entry: &mut BusEntry) -> Result<(), BrokerError> {
        entry
            .master
            .startup_standalone()
            .map_err(|source| BrokerError::Activation {
                interface: interface.to_string(),
                source,
            })?;

        let thread = std::thread::Builder::new()
            .name(format!("ecat-cycle-{interface}"))
            .spawn({
                let interface = interface.to_string();
                let master = entry.master.clone();
                let abort = entry.abort.clone();
                let rt = entry.rt.clone();
                move || cycle_loop(&interface, &master, &abort, &rt)
            })
            .map_err(|err| {
                entry.master.deactivate_bus();
                BrokerError::ThreadSpawn {
                    interface: interface.to_string(),
                    reason: err.to_string(),
                }
            })?;

        entry.barrier.mark_tripped();
        entry.thread = Some(thread);
        entry.state = EntryState::Active;
        info!(interface = %interface, "bus active, cycle thread started");
        Ok(())
    }

    fn park_for_teardown(entry: &mut BusEntry) -> Teardown {
        entry.state = EntryState::TearingDown;
        Teardown {
            master: entry.master.clone(),
            abort: entry.abort.clone(),
            thread: entry.thread.take(),
        }
    }

    /// Runs without the registry lock; the entry is parked in
    /// `TearingDown` so concurrent callers on this interface back off while
    /// callers on other interfaces proceed untouched.
    fn run_teardown(&self, interface: &str, teardown: Teardown) {
        teardown.abort.store(true, Ordering::Release);
        if let Some(thread) = teardown.thread {
            if thread.join().is_err() {
                error!(interface = %interface, "cycle thread panicked during shutdown");
            }
        }
        shutdown_master(interface, &teardown.master);
        self.registry.lock().remove(interface);
        info!(interface = %interface, "bus shut down and unregistered");
    }
}

impl Drop for MasterBroker {
    /// Forced teardown of every remaining interface: signal all aborts, join
    /// all threads, then shut every master down. Order across interfaces is
    /// unspecified.
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        if registry.is_empty() {
            return;
        }
        warn!(
            buses = registry.len(),
            "broker dropped with managed buses; forcing shutdown"
        );
        for entry in registry.values() {
            entry.abort.store(true, Ordering::Release);
        }
        for (interface, entry) in registry.iter_mut() {
            if let Some(thread) = entry.thread.take() {
                if thread.join().is_err() {
                    error!(interface = %interface, "cycle thread panicked during shutdown");
                }
            }
        }
        for (interface, entry) in registry.iter() {
            shutdown_master(interface, &entry.master);
        }
        registry.clear();
    }
}

fn shutdown_master(interface: &str, master: &Arc<Master>) {
    if master.phase() == MasterPhase::Active {
        if let Err(err) = master.pre_shutdown(true) {
            warn!(interface = %interface, error = %err, "safe-state parking failed");
        }
    }
    if let Err(err) = master.shutdown() {
        warn!(interface = %interface, error = %err, "bus shutdown reported an error");
    }
}

/// Body of the per-interface cycle thread.
///
/// This thread is the only writer of process-data requests on behalf of all
/// co-tenants; co-tenants influence the bus solely by mutating the devices
/// they attached, which each cycle reads. The abort flag is checked once per
/// cycle, so worst-case shutdown latency is one cycle period.
fn cycle_loop(interface: &str, master: &Arc<Master>, abort: &AtomicBool, rt: &RtThreadConfig) {
    if let Err(err) = rt.apply_to_current_thread() {
        warn!(interface = %interface, error = %err, "real-time setup failed, cycling at normal priority");
    }
    let config = master.configuration();
    let mut rate = RateWatch::new(config.cycle_time, config.low_rate_warn_threshold_percent);
    info!(interface = %interface, "entering cyclic operation");

    while !abort.load(Ordering::Acquire) {
        match master.update(UpdateMode::StandaloneEnforceRate) {
            Ok(report) => rate.observe(interface, report.cycle),
            Err(err) => warn!(interface = %interface, error = %err, "cycle failed"),
        }
    }

    debug!(interface = %interface, "abort observed, leaving cycle loop");
    master.deactivate_bus();
}

/// Cycles between achieved-rate checks in the cycle thread.
const RATE_CHECK_INTERVAL: u64 = 1_000;

/// Compares the achieved cycle rate against the wall clock.
///
/// A loop that keeps overrunning its period (overloaded host, misbehaving
/// device hook) completes fewer cycles than the elapsed time allows; once the
/// shortfall crosses the configured threshold it is worth an operator's
/// attention.
struct RateWatch {
    period: Duration,
    threshold_percent: u8,
    started: Instant,
    next_check: u64,
}

impl RateWatch {
    fn new(period: Duration, threshold_percent: u8) -> Self {
        Self {
            period,
            threshold_percent,
            started: Instant::now(),
            next_check: RATE_CHECK_INTERVAL,
        }
    }

    fn observe(&mut self, interface: &str, cycle: u64) {
        if cycle < self.next_check {
            return;
        }
        self.next_check = cycle + RATE_CHECK_INTERVAL;
        let expected = u64::try_from(
            self.started.elapsed().as_nanos() / self.period.as_nanos().max(1),
        )
        .unwrap_or(u64::MAX);
        if rate_below_threshold(cycle, expected, self.threshold_percent) {
            warn!(
                interface = %interface,
                achieved_cycles = cycle,
                expected_cycles = expected,
                threshold_percent = self.threshold_percent,
                "cycle rate below configured threshold"
            );
        }
    }
}

fn rate_below_threshold(achieved: u64, expected: u64, threshold_percent: u8) -> bool {
    if expected == 0 {
        return false;
    }
    achieved.saturating_mul(100) / expected < u64::from(threshold_percent)
}

#[cfg(test)]
mod tests {
    use super::rate_below_threshold;

    #[test]
    fn rate_threshold_comparison() {
        // 50 of 100 expected cycles at a 50% threshold is still acceptable.
        assert!(!rate_below_threshold(50, 100, 50));
        assert!(rate_below_threshold(49, 100, 50));
        assert!(!rate_below_threshold(100, 100, 50));
        // No elapsed time yet: nothing to judge.
        assert!(!rate_below_threshold(0, 0, 50));
    }
}
