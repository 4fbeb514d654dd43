//! rusb backend
//!
//! Enumerates devices through a libusb context and drives launchers with
//! class-specific control transfers on interface 0.

use super::{Bus, DeviceKey};
use crate::command::{Direction, LauncherCommand};
use common::{Error, Result};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for a single command transfer
const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

/// Host-to-device, class request, recipient interface
const REQUEST_TYPE: u8 = 0x21;
/// HID SET_REPORT
const REQUEST: u8 = 0x09;
const INTERFACE: u8 = 0;

/// libusb-backed bus
pub struct UsbBus {
    context: Context,
}

impl UsbBus {
    /// Create a new libusb context
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(|e| Error::BackendInitFailed(e.to_string()))?;
        debug!("libusb context created");
        Ok(Self { context })
    }
}

/// An exclusively opened launcher
pub struct UsbSession {
    handle: DeviceHandle<Context>,
    /// Whether we detached a kernel driver and must give it back
    reattach: bool,
}

impl Bus for UsbBus {
    type Device = Device<Context>;
    type Session = UsbSession;

    fn enumerate(&self) -> Result<Vec<Self::Device>> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        Ok(devices.iter().collect())
    }

    fn key(&self, device: &Self::Device) -> DeviceKey {
        DeviceKey::new(device.bus_number(), device.address())
    }

    fn identity_pair(&self, device: &Self::Device) -> Result<(u16, u16)> {
        let desc = device.device_descriptor().map_err(map_rusb_error)?;
        Ok((desc.vendor_id(), desc.product_id()))
    }

    fn acquire(&self, device: &Self::Device) -> Self::Device {
        // Cloning a rusb device takes a libusb reference
        device.clone()
    }

    fn release(&self, device: Self::Device) {
        drop(device);
    }

    fn open_exclusive(&self, device: &Self::Device) -> Result<Self::Session> {
        let handle = device.open().map_err(|e| {
            warn!("Failed to open launcher: {}", e);
            map_rusb_error(e)
        })?;

        let reattach = match handle.kernel_driver_active(INTERFACE) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on {}",
                    INTERFACE,
                    self.key(device)
                );
                handle.detach_kernel_driver(INTERFACE).map_err(map_rusb_error)?;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("Could not check kernel driver status: {}", e);
                false
            }
        };

        if let Err(e) = handle.claim_interface(INTERFACE) {
            warn!("Failed to claim interface {}: {}", INTERFACE, e);
            if reattach {
                let _ = handle.attach_kernel_driver(INTERFACE);
            }
            return Err(match e {
                rusb::Error::Busy => Error::AlreadyOpen,
                other => map_rusb_error(other),
            });
        }

        debug!("Opened launcher {}", self.key(device));
        Ok(UsbSession { handle, reattach })
    }

    fn send_command(&self, session: &mut Self::Session, command: LauncherCommand) -> Result<()> {
        let payload = encode_command(command);
        let written = session
            .handle
            .write_control(REQUEST_TYPE, REQUEST, 0, 0, &payload, COMMAND_TIMEOUT)
            .map_err(map_rusb_error)?;

        if written != payload.len() {
            return Err(Error::Backend(format!(
                "Short write: {} of {} bytes",
                written,
                payload.len()
            )));
        }
        Ok(())
    }

    fn close(&self, session: Self::Session) {
        if let Err(e) = session.handle.release_interface(INTERFACE) {
            warn!("Failed to release interface {}: {}", INTERFACE, e);
        }
        if session.reattach
            && let Err(e) = session.handle.attach_kernel_driver(INTERFACE)
        {
            debug!("Could not reattach kernel driver: {}", e);
        }
    }
}

/// Build the 8-byte report for a command
fn encode_command(command: LauncherCommand) -> [u8; 8] {
    let (kind, value) = match command {
        LauncherCommand::Move(Direction::Down) => (0x02, 0x01),
        LauncherCommand::Move(Direction::Up) => (0x02, 0x02),
        LauncherCommand::Move(Direction::Left) => (0x02, 0x04),
        LauncherCommand::Move(Direction::Right) => (0x02, 0x08),
        LauncherCommand::Fire => (0x02, 0x10),
        LauncherCommand::Stop => (0x02, 0x20),
        LauncherCommand::Led(on) => (0x03, u8::from(on)),
    };
    [kind, value, 0, 0, 0, 0, 0, 0]
}

/// Map a rusb error into the library error
pub fn map_rusb_error(error: rusb::Error) -> Error {
    match error {
        rusb::Error::NoMem => Error::AllocationFailed,
        other => Error::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_move_and_stop() {
        assert_eq!(
            encode_command(LauncherCommand::Move(Direction::Left)),
            [0x02, 0x04, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(encode_command(LauncherCommand::Stop)[1], 0x20);
        assert_eq!(encode_command(LauncherCommand::Fire)[1], 0x10);
    }

    #[test]
    fn test_encode_led() {
        assert_eq!(encode_command(LauncherCommand::Led(true))[..2], [0x03, 0x01]);
        assert_eq!(encode_command(LauncherCommand::Led(false))[..2], [0x03, 0x00]);
    }

    #[test]
    fn test_map_rusb_error() {
        assert!(matches!(
            map_rusb_error(rusb::Error::NoMem),
            Error::AllocationFailed
        ));
        assert!(matches!(
            map_rusb_error(rusb::Error::Pipe),
            Error::Backend(_)
        ));
    }

    #[test]
    fn test_usb_bus_creation() {
        // libusb may be unavailable in sandboxed environments
        match UsbBus::new() {
            Ok(bus) => {
                let devices = bus.enumerate();
                assert!(devices.is_ok() || matches!(devices, Err(Error::Backend(_))));
            }
            Err(e) => {
                eprintln!("USB context creation failed (expected without USB access): {}", e);
            }
        }
    }
}
