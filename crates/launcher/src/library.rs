//! Process-wide library instance
//!
//! [`Library`] guards a single [`Controller`] behind a creation lock, so
//! concurrent `init` calls yield exactly one controller. The free functions
//! below operate on a static `Library<UsbBus>` for callers that want a flat,
//! global API instead of passing a controller around.

use crate::array::LauncherArray;
use crate::bus::{Bus, UsbBus};
use crate::controller::{Controller, ControllerOptions};
use common::error::poisoned;
use common::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Single-controller guard
pub struct Library<B: Bus> {
    controller: Mutex<Option<Arc<Controller<B>>>>,
    initialized: AtomicBool,
}

impl<B: Bus> Default for Library<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Bus> Library<B> {
    pub const fn new() -> Self {
        Self {
            controller: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create the controller
    ///
    /// `make_bus` is only called when no controller exists yet. On failure
    /// nothing is stored and a later `init` may try again.
    pub fn init<F>(&self, make_bus: F, options: ControllerOptions) -> Result<()>
    where
        F: FnOnce() -> Result<B>,
    {
        let mut slot = self.controller.lock().map_err(poisoned("library"))?;
        if slot.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let bus = make_bus()?;
        let controller = Controller::init(Arc::new(bus), options)?;
        *slot = Some(Arc::new(controller));
        self.initialized.store(true, Ordering::Release);
        info!("Library initialized");
        Ok(())
    }

    /// Clean up and drop the controller
    ///
    /// The creation lock stays held until the polling thread has joined and
    /// the registry is drained, so a concurrent `init` waits for the old
    /// controller to finish. The library is uninitialized afterwards even if
    /// cleanup reported an error.
    pub fn cleanup(&self) -> Result<()> {
        let mut slot = self.controller.lock().map_err(poisoned("library"))?;
        let result = slot.as_ref().ok_or(Error::NotInitialized)?.cleanup();
        *slot = None;
        self.initialized.store(false, Ordering::Release);
        result
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The live controller
    pub fn controller(&self) -> Result<Arc<Controller<B>>> {
        self.controller
            .lock()
            .map_err(poisoned("library"))?
            .clone()
            .ok_or(Error::NotInitialized)
    }
}

static USB_LIBRARY: Library<UsbBus> = Library::new();

/// Initialize the global library on the rusb backend with default options
pub fn library_init() -> Result<()> {
    library_init_with(ControllerOptions::default())
}

pub fn library_init_with(options: ControllerOptions) -> Result<()> {
    USB_LIBRARY.init(UsbBus::new, options)
}

pub fn library_cleanup() -> Result<()> {
    USB_LIBRARY.cleanup()
}

pub fn is_library_init() -> bool {
    USB_LIBRARY.is_initialized()
}

/// The global controller, for anything the free functions do not cover
pub fn controller() -> Result<Arc<Controller<UsbBus>>> {
    USB_LIBRARY.controller()
}

pub fn start_continuous_poll() -> Result<()> {
    USB_LIBRARY.controller()?.start_polling()
}

pub fn stop_continuous_poll() -> Result<()> {
    USB_LIBRARY.controller()?.stop_polling()
}

pub fn is_polling() -> Result<bool> {
    USB_LIBRARY.controller()?.is_polling()
}

pub fn get_poll_rate() -> Result<u8> {
    USB_LIBRARY.controller()?.poll_rate()
}

pub fn set_poll_rate(seconds: u8) -> Result<u8> {
    USB_LIBRARY.controller()?.set_poll_rate(seconds)
}

/// Referenced snapshot of the launchers known to the global library
pub fn launcher_array_new() -> Result<LauncherArray<UsbBus>> {
    USB_LIBRARY.controller()?.launchers()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;

    #[test]
    fn test_init_cleanup_cycle() {
        let library: Library<MockBus> = Library::new();
        assert!(!library.is_initialized());
        assert!(matches!(library.cleanup(), Err(Error::NotInitialized)));

        library
            .init(|| Ok(MockBus::new()), ControllerOptions::default())
            .unwrap();
        assert!(library.is_initialized());
        assert!(matches!(
            library.init(|| Ok(MockBus::new()), ControllerOptions::default()),
            Err(Error::AlreadyInitialized)
        ));

        library.cleanup().unwrap();
        assert!(!library.is_initialized());
        assert!(matches!(library.controller(), Err(Error::NotInitialized)));

        // Can be initialized again
        library
            .init(|| Ok(MockBus::new()), ControllerOptions::default())
            .unwrap();
        library.cleanup().unwrap();
    }

    #[test]
    fn test_failed_backend_leaves_uninitialized() {
        let library: Library<MockBus> = Library::new();
        let result = library.init(
            || Err(Error::BackendInitFailed("no usb".to_string())),
            ControllerOptions::default(),
        );
        assert!(matches!(result, Err(Error::BackendInitFailed(_))));
        assert!(!library.is_initialized());
    }

    #[test]
    fn test_bus_not_created_when_initialized() {
        let library: Library<MockBus> = Library::new();
        library
            .init(|| Ok(MockBus::new()), ControllerOptions::default())
            .unwrap();

        let mut called = false;
        let _ = library.init(
            || {
                called = true;
                Ok(MockBus::new())
            },
            ControllerOptions::default(),
        );
        assert!(!called);
        library.cleanup().unwrap();
    }
}
