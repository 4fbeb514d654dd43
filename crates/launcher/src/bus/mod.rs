//! Bus backends
//!
//! The registry never talks to libusb directly. Everything it needs from the
//! bus (listing devices, reading their ids, holding a reference to a raw
//! device, opening it and sending commands) goes through [`Bus`].
//!
//! - [`usb::UsbBus`] is the real backend on top of rusb.
//! - [`mock::MockBus`] is an in-memory bus for tests and demos.

pub mod mock;
pub mod usb;

use crate::command::LauncherCommand;
use common::Result;

pub use mock::{MockBus, MockDevice};
pub use usb::UsbBus;

/// Identity of a raw device on the bus
///
/// Two raw devices with the same key are the same physical attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus_number: u8,
    pub address: u8,
}

impl DeviceKey {
    pub fn new(bus_number: u8, address: u8) -> Self {
        Self {
            bus_number,
            address,
        }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}:{:03}", self.bus_number, self.address)
    }
}

/// Collaborator contract for the bus layer
pub trait Bus: Send + Sync + 'static {
    /// Opaque raw device as returned by enumeration
    type Device: Send + Sync + 'static;
    /// An exclusively opened device
    type Session: Send + 'static;

    /// List the devices currently attached
    fn enumerate(&self) -> Result<Vec<Self::Device>>;

    /// Identity of a raw device
    fn key(&self, device: &Self::Device) -> DeviceKey;

    /// `(vendor_id, product_id)` of a raw device
    fn identity_pair(&self, device: &Self::Device) -> Result<(u16, u16)>;

    /// Take an owned reference to a raw device
    fn acquire(&self, device: &Self::Device) -> Self::Device;

    /// Give back a reference obtained from [`Bus::acquire`]
    fn release(&self, device: Self::Device);

    /// Open a device for exclusive use
    fn open_exclusive(&self, device: &Self::Device) -> Result<Self::Session>;

    /// Send one command over an open session
    fn send_command(&self, session: &mut Self::Session, command: LauncherCommand) -> Result<()>;

    /// Close a session returned by [`Bus::open_exclusive`]
    fn close(&self, session: Self::Session) {
        drop(session);
    }
}
