//! In-memory bus for tests and demos
//!
//! Devices are plugged and unplugged by hand. The bus counts raw device
//! references handed out through [`Bus::acquire`] and returned through
//! [`Bus::release`], so tests can check that every launcher gives its device
//! back exactly once.
//!
//! # Example
//!
//! ```
//! use launcher::bus::{Bus, MockBus};
//! use launcher::classify::{STD_PRODUCT_ID, STD_VENDOR_ID};
//!
//! let bus = MockBus::new();
//! let device = bus.plug(STD_VENDOR_ID, STD_PRODUCT_ID);
//! assert_eq!(bus.enumerate().unwrap(), vec![device]);
//! ```

use super::{Bus, DeviceKey};
use crate::classify::{STD_PRODUCT_ID, STD_VENDOR_ID};
use crate::command::LauncherCommand;
use common::{Error, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A device plugged into a [`MockBus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Open session on a [`MockBus`] device
#[derive(Debug)]
pub struct MockSession {
    key: DeviceKey,
}

#[derive(Debug, Default)]
struct MockState {
    attached: Vec<MockDevice>,
    next_address: u8,
    fail_enumerate: bool,
    open: HashSet<DeviceKey>,
    commands: Vec<(DeviceKey, LauncherCommand)>,
}

/// In-memory bus
#[derive(Debug, Default)]
pub struct MockBus {
    state: Mutex<MockState>,
    enumerations: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug a device with the given ids at the next unused address on bus 1
    pub fn plug(&self, vendor_id: u16, product_id: u16) -> MockDevice {
        let mut state = self.state();
        let mut address = state.next_address;
        for _ in 0..u8::MAX {
            address = address.wrapping_add(1).max(1);
            if !state.attached.iter().any(|d| d.key.address == address) {
                break;
            }
        }
        state.next_address = address;
        let device = MockDevice {
            key: DeviceKey::new(1, address),
            vendor_id,
            product_id,
        };
        state.attached.push(device.clone());
        device
    }

    /// Plug a standard launcher
    pub fn plug_launcher(&self) -> MockDevice {
        self.plug(STD_VENDOR_ID, STD_PRODUCT_ID)
    }

    /// Plug a device back in at its old address
    pub fn replug(&self, device: &MockDevice) {
        let mut state = self.state();
        if !state.attached.iter().any(|d| d.key == device.key) {
            state.attached.push(device.clone());
        }
    }

    /// Unplug a device; returns false if it was not attached
    pub fn unplug(&self, key: DeviceKey) -> bool {
        let mut state = self.state();
        let before = state.attached.len();
        state.attached.retain(|d| d.key != key);
        state.attached.len() != before
    }

    /// Make the next enumerations fail (or succeed again)
    pub fn set_fail_enumerate(&self, fail: bool) {
        self.state().fail_enumerate = fail;
    }

    /// Number of calls to [`Bus::enumerate`] so far
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    /// Raw device references acquired and not yet released
    pub fn live_references(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }

    /// Total raw device references ever released
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Commands sent so far, in order
    pub fn commands(&self) -> Vec<(DeviceKey, LauncherCommand)> {
        self.state().commands.clone()
    }

    /// Whether a device currently has an open session
    pub fn is_open(&self, key: DeviceKey) -> bool {
        self.state().open.contains(&key)
    }
}

impl Bus for MockBus {
    type Device = MockDevice;
    type Session = MockSession;

    fn enumerate(&self) -> Result<Vec<Self::Device>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.fail_enumerate {
            return Err(Error::Backend("mock enumeration failure".to_string()));
        }
        Ok(state.attached.clone())
    }

    fn key(&self, device: &Self::Device) -> DeviceKey {
        device.key
    }

    fn identity_pair(&self, device: &Self::Device) -> Result<(u16, u16)> {
        Ok((device.vendor_id, device.product_id))
    }

    fn acquire(&self, device: &Self::Device) -> Self::Device {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        device.clone()
    }

    fn release(&self, device: Self::Device) {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(device);
    }

    fn open_exclusive(&self, device: &Self::Device) -> Result<Self::Session> {
        let mut state = self.state();
        if !state.attached.iter().any(|d| d.key == device.key) {
            return Err(Error::Backend("No such device (it may have been disconnected)".to_string()));
        }
        if !state.open.insert(device.key) {
            return Err(Error::AlreadyOpen);
        }
        Ok(MockSession { key: device.key })
    }

    fn send_command(&self, session: &mut Self::Session, command: LauncherCommand) -> Result<()> {
        let mut state = self.state();
        if !state.attached.iter().any(|d| d.key == session.key) {
            return Err(Error::Backend("No such device (it may have been disconnected)".to_string()));
        }
        state.commands.push((session.key, command));
        Ok(())
    }

    fn close(&self, session: Self::Session) {
        self.state().open.remove(&session.key);
    }
}
