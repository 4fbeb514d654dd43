//! A single launcher
//!
//! A [`Launcher`] is shared between the registry and any client that
//! references it, through `Arc`. Its lifetime in the registry is governed by
//! two fields under the launcher lock: `connected` and `ref_count`. Once both
//! say nobody needs it (disconnected, zero references) it is *retired*: taken
//! out of the registry and its raw device handed back to the bus.
//!
//! Lock order is registry, then launcher state, then launcher I/O. The state
//! lock is only held for O(1) field updates; bus I/O happens under the I/O
//! lock alone.

use crate::bus::{Bus, DeviceKey};
use crate::classify::LauncherKind;
use crate::command::{Direction, LauncherCommand};
use crate::registry::{LauncherEvent, Registry};
use common::error::poisoned;
use common::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long `zero` drives the launcher down to reach the tilt stop
const ZERO_TILT: Duration = Duration::from_millis(1_000);
/// How long `zero` drives the launcher left to reach the pan stop
const ZERO_PAN: Duration = Duration::from_millis(6_500);

/// Lifetime bookkeeping, guarded by the launcher lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LauncherState {
    pub(crate) connected: bool,
    pub(crate) ref_count: u32,
    /// Raw device released; the launcher is no longer usable
    pub(crate) retired: bool,
    /// Dropped from the registry at cleanup while still referenced
    pub(crate) detached: bool,
}

impl LauncherState {
    /// Nobody needs the launcher any more, but it has not been retired yet
    pub(crate) fn is_orphaned(&self) -> bool {
        !self.connected && self.ref_count == 0 && !self.retired
    }
}

struct LauncherIo<B: Bus> {
    /// Raw device reference, `None` once retired
    device: Option<B::Device>,
    /// Present while claimed
    session: Option<B::Session>,
    led_on: bool,
}

/// A managed launcher device
pub struct Launcher<B: Bus> {
    key: DeviceKey,
    kind: LauncherKind,
    bus: Arc<B>,
    registry: Weak<Registry<B>>,
    state: Mutex<LauncherState>,
    io: Arc<Mutex<LauncherIo<B>>>,
}

impl<B: Bus> Launcher<B> {
    /// Create a connected, unreferenced launcher holding its own reference
    /// to `device`
    pub(crate) fn new(
        bus: Arc<B>,
        registry: Weak<Registry<B>>,
        device: &B::Device,
        kind: LauncherKind,
    ) -> Self {
        let key = bus.key(device);
        let device = bus.acquire(device);

        Self {
            key,
            kind,
            bus,
            registry,
            state: Mutex::new(LauncherState {
                connected: true,
                ref_count: 0,
                retired: false,
                detached: false,
            }),
            io: Arc::new(Mutex::new(LauncherIo {
                device: Some(device),
                session: None,
                led_on: false,
            })),
        }
    }

    /// Bus identity of the underlying device
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// What kind of launcher this is
    pub fn kind(&self) -> LauncherKind {
        self.kind
    }

    pub fn is_connected(&self) -> Result<bool> {
        Ok(self.lock_state()?.connected)
    }

    pub fn ref_count(&self) -> Result<u32> {
        Ok(self.lock_state()?.ref_count)
    }

    /// Whether the launcher has been retired and its device released
    pub fn is_retired(&self) -> Result<bool> {
        Ok(self.lock_state()?.retired)
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, LauncherState>> {
        self.state.lock().map_err(poisoned("launcher"))
    }

    fn lock_io(&self) -> Result<MutexGuard<'_, LauncherIo<B>>> {
        self.io.lock().map_err(poisoned("launcher I/O"))
    }

    /// Mark the launcher retired
    ///
    /// Callers hold the launcher lock, passed in as `state`. The I/O lock is
    /// not touched here: the returned [`Retired`] takes the session and raw
    /// device out when dropped, which callers do after letting go of their
    /// locks, so an in-flight transfer never stalls the registry. Retiring
    /// twice yields nothing, so the device is released exactly once.
    pub(crate) fn retire(&self, state: &mut LauncherState) -> Retired<B> {
        let io = (!state.retired).then(|| self.io.clone());
        state.retired = true;
        Retired {
            bus: self.bus.clone(),
            key: self.key,
            io,
        }
    }

    /// Add a counted reference, returning the new count
    pub fn reference(&self) -> Result<u32> {
        let mut state = self.lock_state()?;
        if state.retired {
            return Err(Error::InvalidHandle);
        }
        state.ref_count += 1;
        Ok(state.ref_count)
    }

    /// Drop a counted reference, returning the remaining count
    ///
    /// Dropping the last reference to a disconnected launcher removes it
    /// from the registry and releases its device.
    pub fn dereference(&self) -> Result<u32> {
        let mut retired = None;
        let (remaining, needs_collect) = {
            let mut state = self.lock_state()?;
            if state.retired {
                return Err(Error::InvalidHandle);
            }
            if state.ref_count == 0 {
                return Err(Error::CountZero);
            }
            state.ref_count -= 1;

            let mut needs_collect = false;
            if state.is_orphaned() {
                if state.detached {
                    retired = Some(self.retire(&mut state));
                } else {
                    needs_collect = true;
                }
            }
            (state.ref_count, needs_collect)
        };
        drop(retired);

        // The launcher lock is released here: the registry lock must never
        // be taken while holding it.
        if needs_collect {
            match self.registry.upgrade() {
                Some(registry) => {
                    registry.collect(self)?;
                }
                None => {
                    let retired = {
                        let mut state = self.lock_state()?;
                        state.is_orphaned().then(|| self.retire(&mut state))
                    };
                    drop(retired);
                }
            }
        }

        Ok(remaining)
    }

    /// Open the launcher for exclusive use
    pub fn claim(&self) -> Result<()> {
        let mut io = self.lock_io()?;
        if io.session.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let device = io.device.as_ref().ok_or(Error::InvalidHandle)?;
        let session = self.bus.open_exclusive(device)?;
        io.session = Some(session);

        info!("Claimed launcher {}", self.key);
        Ok(())
    }

    /// Give up exclusive use
    pub fn unclaim(&self) -> Result<()> {
        let session = self.lock_io()?.session.take().ok_or(Error::Unclaimed)?;
        self.bus.close(session);

        info!("Unclaimed launcher {}", self.key);
        Ok(())
    }

    /// Whether this launcher is currently claimed
    pub fn is_claimed(&self) -> Result<bool> {
        Ok(self.lock_io()?.session.is_some())
    }

    fn send(&self, command: LauncherCommand) -> Result<()> {
        let mut guard = self.lock_io()?;
        let io = &mut *guard;
        if io.device.is_none() {
            return Err(Error::InvalidHandle);
        }
        let session = io.session.as_mut().ok_or(Error::Unclaimed)?;

        self.bus.send_command(session, command).inspect_err(|e| {
            warn!("Command {:?} to launcher {} failed: {}", command, self.key, e);
        })?;
        if let LauncherCommand::Led(on) = command {
            io.led_on = on;
        }
        debug!("Sent {:?} to launcher {}", command, self.key);
        Ok(())
    }

    pub fn fire(&self) -> Result<()> {
        self.send(LauncherCommand::Fire)
    }

    /// Start moving; the launcher keeps going until [`Launcher::stop`]
    pub fn move_in(&self, direction: Direction) -> Result<()> {
        self.send(LauncherCommand::Move(direction))
    }

    pub fn stop(&self) -> Result<()> {
        self.send(LauncherCommand::Stop)
    }

    /// Move for a fixed time, then stop
    pub fn move_for(&self, direction: Direction, duration: Duration) -> Result<()> {
        self.move_in(direction)?;
        std::thread::sleep(duration);
        self.stop()
    }

    /// Drive the launcher to its lower-left stops
    pub fn zero(&self) -> Result<()> {
        self.move_for(Direction::Down, ZERO_TILT)?;
        self.move_for(Direction::Left, ZERO_PAN)
    }

    pub fn led_on(&self) -> Result<()> {
        self.send(LauncherCommand::Led(true))
    }

    pub fn led_off(&self) -> Result<()> {
        self.send(LauncherCommand::Led(false))
    }

    /// Last LED state set through this handle
    pub fn led_state(&self) -> Result<bool> {
        let io = self.lock_io()?;
        if io.device.is_none() {
            return Err(Error::InvalidHandle);
        }
        Ok(io.led_on)
    }

    /// Event describing a connectivity change, for the registry to publish
    pub(crate) fn connectivity_event(&self, state: &LauncherState) -> LauncherEvent {
        if state.connected {
            LauncherEvent::Reconnected { key: self.key }
        } else {
            LauncherEvent::Disconnected {
                key: self.key,
                ref_count: state.ref_count,
            }
        }
    }
}

/// Pending release of a retired launcher's session and raw device
///
/// Dropping it waits for the I/O lock, then closes the session and releases
/// the device to the bus.
pub(crate) struct Retired<B: Bus> {
    bus: Arc<B>,
    key: DeviceKey,
    io: Option<Arc<Mutex<LauncherIo<B>>>>,
}

impl<B: Bus> Drop for Retired<B> {
    fn drop(&mut self) {
        let Some(io) = self.io.take() else {
            return;
        };
        let (session, device) = {
            let mut io = io.lock().unwrap_or_else(PoisonError::into_inner);
            (io.session.take(), io.device.take())
        };
        if let Some(session) = session {
            self.bus.close(session);
        }
        if let Some(device) = device {
            self.bus.release(device);
            debug!("Released device of retired launcher {}", self.key);
        }
    }
}

impl<B: Bus> std::fmt::Debug for Launcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state.lock().ok().map(|s| *s))
            .finish()
    }
}

impl<B: Bus> Drop for Launcher<B> {
    fn drop(&mut self) {
        // Last Arc gone without being retired (registry dropped, or a
        // detached launcher never dereferenced): give the device back.
        let (session, device) = {
            let mut io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
            (io.session.take(), io.device.take())
        };
        if let Some(session) = session {
            self.bus.close(session);
        }
        if let Some(device) = device {
            self.bus.release(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;

    fn detached_launcher(bus: &Arc<MockBus>) -> Launcher<MockBus> {
        let device = bus.plug_launcher();
        Launcher::new(bus.clone(), Weak::new(), &device, LauncherKind::Standard)
    }

    #[test]
    fn test_new_launcher_state() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);

        assert!(launcher.is_connected().unwrap());
        assert_eq!(launcher.ref_count().unwrap(), 0);
        assert!(!launcher.is_retired().unwrap());
        assert_eq!(launcher.kind(), LauncherKind::Standard);
        assert_eq!(bus.live_references(), 1);
    }

    #[test]
    fn test_reference_and_dereference() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);

        assert_eq!(launcher.reference().unwrap(), 1);
        assert_eq!(launcher.reference().unwrap(), 2);
        assert_eq!(launcher.dereference().unwrap(), 1);
        assert_eq!(launcher.dereference().unwrap(), 0);
        assert!(matches!(launcher.dereference(), Err(Error::CountZero)));
        // Still connected, so never retired
        assert!(!launcher.is_retired().unwrap());
    }

    #[test]
    fn test_last_dereference_without_registry_retires() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);

        launcher.reference().unwrap();
        launcher.lock_state().unwrap().connected = false;
        assert_eq!(launcher.dereference().unwrap(), 0);

        assert!(launcher.is_retired().unwrap());
        assert_eq!(bus.live_references(), 0);
        assert!(matches!(launcher.reference(), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_retire_does_not_wait_for_io() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);
        launcher.claim().unwrap();

        // A client mid-transfer holds the I/O lock
        let io = launcher.lock_io().unwrap();
        let (finished, retired) = std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let mut state = launcher.lock_state().unwrap();
                launcher.retire(&mut state)
            });
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            let finished = handle.is_finished();
            drop(io);
            (finished, handle.join().unwrap())
        });
        assert!(finished);
        assert!(launcher.is_retired().unwrap());
        assert_eq!(bus.released(), 0);
        assert!(bus.is_open(launcher.key()));

        drop(retired);
        assert_eq!(bus.released(), 1);
        assert!(!bus.is_open(launcher.key()));
        assert!(!launcher.is_claimed().unwrap());
    }

    #[test]
    fn test_retire_releases_once() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);

        let (first, second) = {
            let mut state = launcher.lock_state().unwrap();
            (launcher.retire(&mut state), launcher.retire(&mut state))
        };
        assert_eq!(bus.released(), 0);
        drop(first);
        drop(second);
        assert_eq!(bus.released(), 1);
        drop(launcher);
        assert_eq!(bus.released(), 1);
        assert_eq!(bus.live_references(), 0);
    }

    #[test]
    fn test_drop_releases_device() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);
        launcher.claim().unwrap();
        let key = launcher.key();

        drop(launcher);
        assert_eq!(bus.live_references(), 0);
        assert!(!bus.is_open(key));
    }

    #[test]
    fn test_claim_unclaim() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);

        assert!(matches!(launcher.unclaim(), Err(Error::Unclaimed)));
        launcher.claim().unwrap();
        assert!(launcher.is_claimed().unwrap());
        assert!(matches!(launcher.claim(), Err(Error::AlreadyOpen)));
        launcher.unclaim().unwrap();
        assert!(!launcher.is_claimed().unwrap());
        assert!(!bus.is_open(launcher.key()));
    }

    #[test]
    fn test_commands_require_claim() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);

        assert!(matches!(launcher.fire(), Err(Error::Unclaimed)));
        assert!(matches!(launcher.led_on(), Err(Error::Unclaimed)));
        assert!(bus.commands().is_empty());
    }

    #[test]
    fn test_commands_pass_through() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);
        launcher.claim().unwrap();

        launcher.move_in(Direction::Up).unwrap();
        launcher.stop().unwrap();
        launcher.fire().unwrap();
        launcher.led_on().unwrap();
        assert!(launcher.led_state().unwrap());
        launcher.led_off().unwrap();
        assert!(!launcher.led_state().unwrap());

        let sent: Vec<_> = bus.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            sent,
            vec![
                LauncherCommand::Move(Direction::Up),
                LauncherCommand::Stop,
                LauncherCommand::Fire,
                LauncherCommand::Led(true),
                LauncherCommand::Led(false),
            ]
        );
    }

    #[test]
    fn test_move_for_stops() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);
        launcher.claim().unwrap();

        launcher
            .move_for(Direction::Right, Duration::from_millis(5))
            .unwrap();
        let sent: Vec<_> = bus.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            sent,
            vec![LauncherCommand::Move(Direction::Right), LauncherCommand::Stop]
        );
    }

    #[test]
    fn test_command_after_unplug_fails() {
        let bus = Arc::new(MockBus::new());
        let launcher = detached_launcher(&bus);
        launcher.claim().unwrap();
        bus.unplug(launcher.key());

        assert!(matches!(launcher.fire(), Err(Error::Backend(_))));
    }
}
