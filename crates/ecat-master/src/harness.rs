//! Recording doubles for the bus and device boundaries.
//!
//! Used by this crate's tests and, behind the `harness` feature, by
//! downstream crates that need to observe lifecycle ordering without real
//! hardware. The bus and all devices share one [`EventLog`] so tests can
//! assert cross-boundary ordering (e.g. safe-op parking before bus release).

use crate::bus::{Bus, BusFactory};
use crate::config::MasterConfiguration;
use crate::device::Device;
use crate::error::{BusError, DeviceError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared append-only list of lifecycle events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Copy of all events recorded so far, in order.
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Index of the first occurrence of `event`, if recorded.
    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

/// Scripted [`Bus`] double that records its lifecycle into an [`EventLog`].
///
/// Cyclic exchanges are counted, not logged, so long self-paced runs do not
/// flood the log. Dropping the bus records `bus:released`.
pub struct RecordingBus {
    interface: String,
    log: EventLog,
    exchanges: Arc<AtomicU64>,
    fail_activate: Arc<AtomicBool>,
    fail_exchange: Arc<AtomicBool>,
    fail_sync0_for: Arc<Mutex<Vec<u32>>>,
}

impl Bus for RecordingBus {
    fn name(&self) -> &str {
        &self.interface
    }

    fn activate(&mut self) -> Result<(), BusError> {
        if self.fail_activate.load(Ordering::SeqCst) {
            return Err(BusError::ActivationFailed {
                interface: self.interface.clone(),
                reason: "scripted activation failure".into(),
            });
        }
        self.log.record("bus:activate");
        Ok(())
    }

    fn deactivate(&mut self) {
        self.log.record("bus:deactivate");
    }

    fn exchange_process_data(&mut self) -> Result<(), BusError> {
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(BusError::ExchangeFailed("scripted exchange failure".into()));
        }
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn configure_sync0(
        &mut self,
        address: u32,
        _cycle_time: Duration,
        _shift: Duration,
    ) -> Result<(), BusError> {
        if self.fail_sync0_for.lock().contains(&address) {
            return Err(BusError::ClockProgrammingFailed {
                address,
                reason: "scripted sync0 failure".into(),
            });
        }
        self.log.record(format!("bus:sync0:{address}"));
        Ok(())
    }
}

impl Drop for RecordingBus {
    fn drop(&mut self) {
        self.log.record("bus:released");
    }
}

/// Factory producing [`RecordingBus`] instances that all share this
/// factory's log, counters, and failure scripting.
#[derive(Clone)]
pub struct RecordingBusFactory {
    log: EventLog,
    exchanges: Arc<AtomicU64>,
    created: Arc<AtomicUsize>,
    fail_create: Arc<AtomicBool>,
    fail_activate: Arc<AtomicBool>,
    fail_exchange: Arc<AtomicBool>,
    fail_sync0_for: Arc<Mutex<Vec<u32>>>,
}

impl RecordingBusFactory {
    /// Factory with a fresh log.
    pub fn new() -> Self {
        Self::with_log(EventLog::new())
    }

    /// Factory recording into an existing log (share it with mock devices to
    /// observe cross-boundary ordering).
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            exchanges: Arc::new(AtomicU64::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
            fail_create: Arc::new(AtomicBool::new(false)),
            fail_activate: Arc::new(AtomicBool::new(false)),
            fail_exchange: Arc::new(AtomicBool::new(false)),
            fail_sync0_for: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The shared event log.
    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    /// All events recorded so far.
    pub fn events(&self) -> Vec<String> {
        self.log.snapshot()
    }

    /// Total process-data exchanges across every bus this factory created.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Number of buses created.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Script `create` to fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Script `activate` to fail on every bus.
    pub fn set_fail_activate(&self, fail: bool) {
        self.fail_activate.store(fail, Ordering::SeqCst);
    }

    /// Script the cyclic exchange to fail on every bus.
    pub fn set_fail_exchange(&self, fail: bool) {
        self.fail_exchange.store(fail, Ordering::SeqCst);
    }

    /// Script sync0 programming to fail for the given slave address.
    pub fn fail_sync0_for(&self, address: u32) {
        self.fail_sync0_for.lock().push(address);
    }
}

impl Default for RecordingBusFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BusFactory for RecordingBusFactory {
    fn create(&self, config: &MasterConfiguration) -> Result<Box<dyn Bus>, BusError> {
        let interface = config.interface.as_str();
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BusError::OpenFailed {
                interface: interface.to_string(),
                reason: "scripted open failure".into(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("bus:create:{interface}"));
        Ok(Box::new(RecordingBus {
            interface: interface.to_string(),
            log: self.log.clone(),
            exchanges: self.exchanges.clone(),
            fail_activate: self.fail_activate.clone(),
            fail_exchange: self.fail_exchange.clone(),
            fail_sync0_for: self.fail_sync0_for.clone(),
        }))
    }
}

/// Scripted [`Device`] double.
///
/// All scripting flags are atomics so tests can flip them while the device
/// is attached and cycling, matching the synchronization contract real
/// devices must uphold.
pub struct MockDevice {
    name: String,
    address: u32,
    log: EventLog,
    fail_configure: AtomicBool,
    fail_operational: AtomicBool,
    fail_update: AtomicBool,
    updates: AtomicU64,
}

impl MockDevice {
    /// Device recording into the given log.
    pub fn new(name: impl Into<String>, address: u32, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            address,
            log,
            fail_configure: AtomicBool::new(false),
            fail_operational: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            updates: AtomicU64::new(0),
        })
    }

    /// Script `configure` to fail.
    pub fn set_fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    /// Script `set_operational` to fail.
    pub fn set_fail_operational(&self, fail: bool) {
        self.fail_operational.store(fail, Ordering::SeqCst);
    }

    /// Script the per-cycle hook to fail.
    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Number of cycle updates this device has seen.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl Device for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u32 {
        self.address
    }

    fn configure(&self) -> Result<(), DeviceError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(DeviceError::ConfigurationFailed(
                "scripted configure failure".into(),
            ));
        }
        self.log.record(format!("dev:{}:configure", self.name));
        Ok(())
    }

    fn set_operational(&self) -> Result<(), DeviceError> {
        if self.fail_operational.load(Ordering::SeqCst) {
            return Err(DeviceError::StateTransitionFailed {
                target: "operational",
                reason: "scripted transition failure".into(),
            });
        }
        self.log.record(format!("dev:{}:operational", self.name));
        Ok(())
    }

    fn set_safe_operational(&self) -> Result<(), DeviceError> {
        self.log.record(format!("dev:{}:safe-op", self.name));
        Ok(())
    }

    fn update_cycle(&self) -> Result<(), DeviceError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(DeviceError::UpdateFault("scripted update fault".into()));
        }
        Ok(())
    }
}
