//! Controller
//!
//! Composition root for one bus: owns the registry, the poll interval, the
//! polling thread and the event channel. Several controllers may coexist
//! (tests run one per mock bus); the process-wide single instance is
//! enforced one level up by [`crate::library::Library`].

use crate::array::LauncherArray;
use crate::bus::{Bus, DeviceKey, UsbBus};
use crate::launcher::Launcher;
use crate::poll_rate::PollRateRegulator;
use crate::polling::PollingLoop;
use crate::registry::{LauncherEvent, ReconcileReport, Registry};
use common::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Controller settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Slots allocated up front
    pub initial_capacity: usize,
    /// Hard limit on slots; `None` lets the table grow without bound
    pub max_capacity: Option<usize>,
    /// Seconds between scans, 0 for the default
    pub poll_rate: u8,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            initial_capacity: 8,
            max_capacity: Some(128),
            poll_rate: 0,
        }
    }
}

/// Owns the launcher registry and its polling loop
pub struct Controller<B: Bus> {
    initialized: AtomicBool,
    bus: Arc<B>,
    registry: Arc<Registry<B>>,
    poll_rate: Arc<PollRateRegulator>,
    poller: PollingLoop,
    events: broadcast::Sender<LauncherEvent>,
}

impl Controller<UsbBus> {
    /// Create a controller on a fresh libusb context
    pub fn init_usb(options: ControllerOptions) -> Result<Self> {
        let bus = UsbBus::new()?;
        Self::init(Arc::new(bus), options)
    }
}

impl<B: Bus> Controller<B> {
    /// Create an initialized controller
    ///
    /// Polling is not started; call [`Controller::start_polling`] or
    /// [`Controller::refresh`].
    pub fn init(bus: Arc<B>, options: ControllerOptions) -> Result<Self> {
        let poll_rate = Arc::new(PollRateRegulator::new(options.poll_rate)?);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Registry::new(
            bus.clone(),
            options.initial_capacity,
            options.max_capacity,
            events.clone(),
        )?;

        info!(
            "Controller initialized (capacity {}, poll rate {}s)",
            options.initial_capacity,
            poll_rate.get()
        );
        Ok(Self {
            initialized: AtomicBool::new(true),
            bus,
            registry,
            poll_rate,
            poller: PollingLoop::new(),
            events,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Stop polling and empty the registry
    ///
    /// Launchers still referenced by clients stay usable as handles but are
    /// marked disconnected; they release their device on their last
    /// dereference. The controller is left uninitialized even if a step
    /// fails, in which case the first error is returned.
    pub fn cleanup(&self) -> Result<()> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Err(Error::NotInitialized);
        }

        let stopped = self.poller.stop();
        let drained = self.registry.drain();
        match &drained {
            Ok(0) => info!("Controller cleaned up"),
            Ok(referenced) => info!(
                "Controller cleaned up, {} launchers still referenced",
                referenced
            ),
            Err(e) => warn!("Failed to drain registry: {}", e),
        }
        stopped.and(drained.map(|_| ()))
    }

    /// Start the background polling thread
    pub fn start_polling(&self) -> Result<()> {
        self.ensure_initialized()?;
        let bus = self.bus.clone();
        let registry = self.registry.clone();

        self.poller.start(self.poll_rate.clone(), move || {
            if let Err(e) = run_cycle(bus.as_ref(), registry.as_ref()) {
                warn!("Polling cycle failed: {}", e);
            }
        })
    }

    /// Stop the polling thread, waiting for it to exit
    pub fn stop_polling(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.poller.stop()
    }

    pub fn is_polling(&self) -> Result<bool> {
        self.ensure_initialized()?;
        self.poller.is_polling()
    }

    /// Seconds between scans
    pub fn poll_rate(&self) -> Result<u8> {
        self.ensure_initialized()?;
        Ok(self.poll_rate.get())
    }

    /// Change the seconds between scans; 0 restores the default
    pub fn set_poll_rate(&self, seconds: u8) -> Result<u8> {
        self.ensure_initialized()?;
        self.poll_rate.set(seconds)
    }

    /// Run one scan now, on the calling thread
    pub fn refresh(&self) -> Result<ReconcileReport> {
        self.ensure_initialized()?;
        run_cycle(self.bus.as_ref(), self.registry.as_ref())
    }

    /// Referenced snapshot of all known launchers
    pub fn launchers(&self) -> Result<LauncherArray<B>> {
        self.ensure_initialized()?;
        self.registry.snapshot()
    }

    pub fn launcher_count(&self) -> Result<usize> {
        self.ensure_initialized()?;
        self.registry.len()
    }

    /// Look up one launcher by bus identity, without referencing it
    pub fn launcher(&self, key: DeviceKey) -> Result<Arc<Launcher<B>>> {
        self.ensure_initialized()?;
        self.registry.get(key)?.ok_or(Error::NotFound)
    }

    /// Receive registry change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<Registry<B>> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }
}

/// One enumerate-and-reconcile cycle
fn run_cycle<B: Bus>(bus: &B, registry: &Registry<B>) -> Result<ReconcileReport> {
    let devices = bus.enumerate()?;
    let report = registry.reconcile(devices)?;
    if !report.is_unchanged() {
        debug!(
            "Scan: {} added, {} disconnected, {} reconnected, {} removed",
            report.added.len(),
            report.disconnected.len(),
            report.reconnected.len(),
            report.removed.len()
        );
    }
    Ok(report)
}

impl<B: Bus> std::fmt::Debug for Controller<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("initialized", &self.is_initialized())
            .field("registry", &self.registry)
            .field("poll_rate", &self.poll_rate.get())
            .finish()
    }
}

impl<B: Bus> Drop for Controller<B> {
    fn drop(&mut self) {
        if self.is_initialized()
            && let Err(e) = self.cleanup()
        {
            warn!("Cleanup on drop failed: {}", e);
        }
    }
}
