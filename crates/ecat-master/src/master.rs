//! Master lifecycle and cyclic update.

use crate::bus::{Bus, BusFactory};
use crate::config::MasterConfiguration;
use crate::device::Device;
use crate::error::{ConfigurationError, MasterError};
use ecat_scheduler::CycleScheduler;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle phase of a master.
///
/// Transitions run strictly left to right; `update` is only legal in
/// `Active`, and attaching devices is only legal before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterPhase {
    /// Constructed, no bus connection yet.
    Created,
    /// Bus connection open, nothing attached.
    BusCreated,
    /// At least one device attached, not yet cycling.
    DevicesAttached,
    /// Bus activated, devices operational, cycles may run.
    Active,
    /// Devices parked in safe-operational, bus still open.
    SafeShutdown,
    /// Bus released.
    Closed,
}

/// Pacing policy for [`Master::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// The caller paces the loop; the call returns as soon as the cycle's
    /// I/O completes.
    ExternallyPaced,
    /// The call first blocks until the configured cycle period has elapsed
    /// since the previous cycle, so a tight loop converges to a stable rate.
    StandaloneEnforceRate,
}

/// Outcome of one bus cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Cycle counter value after this cycle (self-paced cycles only;
    /// externally paced cycles report 0).
    pub cycle: u64,
    /// Names of devices whose update hook faulted this cycle. Their faults
    /// did not stop the remaining devices.
    pub device_faults: Vec<String>,
}

impl CycleReport {
    /// True when every device completed the cycle.
    pub fn is_clean(&self) -> bool {
        self.device_faults.is_empty()
    }
}

struct MasterState {
    phase: MasterPhase,
    bus: Option<Box<dyn Bus>>,
    devices: Vec<Arc<dyn Device>>,
}

/// Drives one bus: activation, cyclic process-data exchange,
/// distributed-clock alignment, staged shutdown.
///
/// All methods take `&self`; a shared `Arc<Master>` serves the cycle thread
/// and co-tenant threads concurrently. Bus and device collections are
/// guarded by one mutex, so a cycle and a (pre-activation) attach never
/// interleave.
pub struct Master {
    factory: Arc<dyn BusFactory>,
    state: Mutex<MasterState>,
    config: RwLock<MasterConfiguration>,
    pacer: Mutex<Option<CycleScheduler>>,
}

impl Master {
    /// Create an unconfigured master that will obtain its bus from `factory`.
    pub fn new(factory: Arc<dyn BusFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(MasterState {
                phase: MasterPhase::Created,
                bus: None,
                devices: Vec::new(),
            }),
            config: RwLock::new(MasterConfiguration::default()),
            pacer: Mutex::new(None),
        }
    }

    /// Bind a configuration to this master.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration values; the previous configuration is
    /// kept in that case.
    pub fn load_configuration(&self, config: MasterConfiguration) -> Result<(), MasterError> {
        config.validate()?;
        let scheduler = CycleScheduler::with_period(config.cycle_time)
            .map_err(|_| MasterError::Configuration(ConfigurationError::ZeroCycleTime))?;
        *self.pacer.lock() = Some(scheduler);
        *self.config.write() = config;
        Ok(())
    }

    /// The currently bound configuration.
    pub fn configuration(&self) -> MasterConfiguration {
        self.config.read().clone()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> MasterPhase {
        self.state.lock().phase
    }

    /// Open the bus connection for the configured interface.
    ///
    /// # Errors
    ///
    /// A second call fails with [`MasterError::BusAlreadyCreated`]; the
    /// first bus stays untouched. Transport failures surface as
    /// [`MasterError::Bus`].
    pub fn create_bus(&self) -> Result<(), MasterError> {
        let config = self.config.read().clone();
        let interface = config.interface.clone();
        let mut state = self.state.lock();
        if state.bus.is_some() {
            return Err(MasterError::BusAlreadyCreated(interface));
        }
        let bus = self
            .factory
            .create(&config)
            .map_err(|source| MasterError::Bus {
                interface: interface.clone(),
                source,
            })?;
        state.bus = Some(bus);
        if state.phase == MasterPhase::Created {
            state.phase = if state.devices.is_empty() {
                MasterPhase::BusCreated
            } else {
                MasterPhase::DevicesAttached
            };
        }
        info!(interface = %interface, "bus connection created");
        Ok(())
    }

    /// Attach a device; it joins every subsequent cycle in attachment order.
    ///
    /// # Errors
    ///
    /// A name collision fails with [`MasterError::DuplicateDevice`] and
    /// leaves the device set unchanged. Attaching after activation is a
    /// usage error.
    pub fn attach_device(&self, device: Arc<dyn Device>) -> Result<(), MasterError> {
        let mut state = self.state.lock();
        if matches!(
            state.phase,
            MasterPhase::Active | MasterPhase::SafeShutdown | MasterPhase::Closed
        ) {
            return Err(MasterError::AttachAfterActivation {
                device: device.name().to_string(),
                interface: self.config.read().interface.clone(),
            });
        }
        if state.devices.iter().any(|d| d.name() == device.name()) {
            return Err(MasterError::DuplicateDevice(device.name().to_string()));
        }
        debug!(device = %device.name(), address = device.address(), "device attached");
        state.devices.push(device);
        if state.phase == MasterPhase::BusCreated {
            state.phase = MasterPhase::DevicesAttached;
        }
        Ok(())
    }

    /// True if a device with this name is attached.
    pub fn device_exists(&self, name: &str) -> bool {
        self.state.lock().devices.iter().any(|d| d.name() == name)
    }

    /// Number of attached devices.
    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    /// Activate the bus and bring every device to operational, for a master
    /// paced by an external caller.
    ///
    /// Devices run their configuration sequence and state ramp in attachment
    /// order; a failing device is recorded and the rest are still attempted,
    /// so the returned [`MasterError::StartupFailures`] carries the full
    /// failure set. On any failure the bus is deactivated again and the
    /// phase is left where it was, so startup can be retried.
    pub fn startup(&self) -> Result<(), MasterError> {
        self.startup_inner(false)
    }

    /// Like [`Master::startup`], for a master that will be driven by its own
    /// cycle thread: additionally re-anchors the internal cycle pacer so the
    /// first self-paced cycle starts a full period from now.
    pub fn startup_standalone(&self) -> Result<(), MasterError> {
        self.startup_inner(true)
    }

    fn startup_inner(&self, standalone: bool) -> Result<(), MasterError> {
        let config = self.config.read().clone();
        let interface = config.interface.clone();
        let mut state = self.state.lock();
        match state.phase {
            MasterPhase::BusCreated | MasterPhase::DevicesAttached => {}
            phase => {
                return Err(MasterError::StartupFromWrongPhase { interface, phase });
            }
        }
        let bus = state
            .bus
            .as_mut()
            .ok_or_else(|| MasterError::BusNotCreated(interface.clone()))?;

        bus.activate().map_err(|source| MasterError::Bus {
            interface: interface.clone(),
            source,
        })?;

        let mut failed = Vec::new();
        for device in &state.devices {
            if let Err(err) = device.configure() {
                warn!(device = %device.name(), error = %err, "device configuration failed");
                failed.push(device.name().to_string());
                continue;
            }
            if let Err(err) = device.set_operational() {
                warn!(device = %device.name(), error = %err, "device did not reach operational");
                failed.push(device.name().to_string());
            }
        }
        if !failed.is_empty() {
            if let Some(bus) = state.bus.as_mut() {
                bus.deactivate();
            }
            return Err(MasterError::StartupFailures {
                interface,
                devices: failed,
            });
        }

        // Align slave clocks while the bus is up but before the first cycle.
        let addresses: Vec<u32> = state.devices.iter().map(|d| d.address()).collect();
        if let Some(bus) = state.bus.as_mut() {
            let missed = sync0_best_effort(bus.as_mut(), &addresses, &config);
            if !missed.is_empty() {
                warn!(
                    interface = %interface,
                    addresses = ?missed,
                    "some slave clocks are not synchronized"
                );
            }
        }

        state.phase = MasterPhase::Active;
        info!(
            interface = %interface,
            devices = state.devices.len(),
            "master active"
        );
        drop(state);

        if standalone {
            if let Some(pacer) = self.pacer.lock().as_mut() {
                pacer.restart();
            }
        }
        Ok(())
    }

    /// Perform exactly one bus cycle: process-data exchange, then every
    /// device's update hook in attachment order.
    ///
    /// Per-device faults are logged, collected in the [`CycleReport`], and
    /// do not stop the pass. In [`UpdateMode::StandaloneEnforceRate`] the
    /// call first blocks on the internal pacer.
    ///
    /// # Errors
    ///
    /// [`MasterError::NotActive`] outside the `Active` phase;
    /// [`MasterError::Bus`] when the exchange itself fails (device hooks are
    /// skipped for that cycle).
    pub fn update(&self, mode: UpdateMode) -> Result<CycleReport, MasterError> {
        let interface = self.config.read().interface.clone();
        {
            let state = self.state.lock();
            if state.phase != MasterPhase::Active {
                return Err(MasterError::NotActive {
                    interface,
                    phase: state.phase,
                });
            }
        }

        let mut cycle = 0;
        if mode == UpdateMode::StandaloneEnforceRate {
            let mut pacer = self.pacer.lock();
            match pacer.as_mut() {
                Some(pacer) => cycle = pacer.wait_for_cycle(),
                None => return Err(MasterError::NotConfigured),
            }
        }

        let mut state = self.state.lock();
        if state.phase != MasterPhase::Active {
            return Err(MasterError::NotActive {
                interface,
                phase: state.phase,
            });
        }
        let bus = state
            .bus
            .as_mut()
            .ok_or_else(|| MasterError::BusNotCreated(interface.clone()))?;
        bus.exchange_process_data()
            .map_err(|source| MasterError::Bus {
                interface: interface.clone(),
                source,
            })?;

        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };
        for device in &state.devices {
            if let Err(err) = device.update_cycle() {
                warn!(device = %device.name(), error = %err, "device faulted this cycle");
                report.device_faults.push(device.name().to_string());
            }
        }
        Ok(report)
    }

    /// Align the distributed clocks of the given slave addresses to the bus
    /// reference clock.
    ///
    /// Every address is attempted; failures are collected into
    /// [`MasterError::ClockSyncFailures`]. Addresses not listed are left
    /// unsynchronized.
    ///
    /// # Errors
    ///
    /// Usage error outside the `Active` phase.
    pub fn sync_distributed_clock0(&self, addresses: &[u32]) -> Result<(), MasterError> {
        let config = self.config.read().clone();
        let interface = config.interface.clone();
        let mut state = self.state.lock();
        if state.phase != MasterPhase::Active {
            return Err(MasterError::NotActive {
                interface,
                phase: state.phase,
            });
        }
        let bus = state
            .bus
            .as_mut()
            .ok_or_else(|| MasterError::BusNotCreated(interface.clone()))?;
        let missed = sync0_best_effort(bus.as_mut(), addresses, &config);
        if missed.is_empty() {
            Ok(())
        } else {
            Err(MasterError::ClockSyncFailures {
                interface,
                addresses: missed,
            })
        }
    }

    /// Park every device in safe-operational before the bus goes away.
    ///
    /// Best-effort across devices in attachment order; failures are logged
    /// and the remaining devices are still attempted. With
    /// `set_to_safe_op = false` only the phase changes.
    ///
    /// # Errors
    ///
    /// Usage error outside the `Active` phase.
    pub fn pre_shutdown(&self, set_to_safe_op: bool) -> Result<(), MasterError> {
        let interface = self.config.read().interface.clone();
        let mut state = self.state.lock();
        if state.phase != MasterPhase::Active {
            return Err(MasterError::NotActive {
                interface,
                phase: state.phase,
            });
        }
        if set_to_safe_op {
            for device in &state.devices {
                if let Err(err) = device.set_safe_operational() {
                    warn!(device = %device.name(), error = %err, "device did not reach safe-operational");
                }
            }
        }
        state.phase = MasterPhase::SafeShutdown;
        info!(interface = %interface, "devices parked, ready for shutdown");
        Ok(())
    }

    /// Release the bus connection.
    ///
    /// Legal from any phase before `Closed`; skipping
    /// [`Master::pre_shutdown`] skips safe-state parking and is the caller's
    /// explicit choice, never automatic.
    ///
    /// # Errors
    ///
    /// [`MasterError::AlreadyClosed`] on a second call.
    pub fn shutdown(&self) -> Result<(), MasterError> {
        let interface = self.config.read().interface.clone();
        let mut state = self.state.lock();
        if state.phase == MasterPhase::Closed {
            return Err(MasterError::AlreadyClosed(interface));
        }
        if state.phase == MasterPhase::Active {
            warn!(interface = %interface, "shutting down without safe-state parking");
        }
        if let Some(mut bus) = state.bus.take() {
            bus.deactivate();
        }
        state.phase = MasterPhase::Closed;
        info!(interface = %interface, "bus released");
        Ok(())
    }

    /// Stop cyclic operation on the wire without releasing the bus.
    ///
    /// Called by a cycle thread on its way out, after the abort flag was
    /// observed; the staged `pre_shutdown`/`shutdown` path still runs
    /// afterwards.
    pub fn deactivate_bus(&self) {
        let mut state = self.state.lock();
        if let Some(bus) = state.bus.as_mut() {
            bus.deactivate();
        }
    }
}

fn sync0_best_effort(
    bus: &mut dyn Bus,
    addresses: &[u32],
    config: &MasterConfiguration,
) -> Vec<u32> {
    let mut missed = Vec::new();
    for &address in addresses {
        match bus.configure_sync0(address, config.cycle_time, config.sync0_shift) {
            Ok(()) => debug!(address, "sync0 aligned"),
            Err(err) => {
                warn!(address, error = %err, "sync0 programming failed");
                missed.push(address);
            }
        }
    }
    missed
}
