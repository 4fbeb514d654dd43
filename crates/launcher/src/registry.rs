//! Launcher registry
//!
//! Holds the table of known launchers and merges each freshly enumerated
//! device list into it. The slot table lives behind one `RwLock`; every
//! operation that needs both the table and a launcher's own lock lives in
//! this module and takes them in that order (table first). Launchers never
//! reach into the table while holding their own lock.

use crate::array::LauncherArray;
use crate::bus::{Bus, DeviceKey};
use crate::classify::{LauncherKind, classify};
use crate::launcher::{Launcher, Retired};
use common::error::poisoned;
use common::{Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Registry change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherEvent {
    /// A new launcher was added
    Arrived { key: DeviceKey, kind: LauncherKind },
    /// A launcher vanished from the bus but is still referenced
    Disconnected { key: DeviceKey, ref_count: u32 },
    /// A disconnected launcher showed up again before being removed
    Reconnected { key: DeviceKey },
    /// A launcher was removed and its device released
    Removed { key: DeviceKey },
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub added: Vec<DeviceKey>,
    pub disconnected: Vec<DeviceKey>,
    pub reconnected: Vec<DeviceKey>,
    pub removed: Vec<DeviceKey>,
    /// Devices that are not launchers
    pub ignored: usize,
    /// Launchers that could not be added
    pub failures: Vec<(DeviceKey, Error)>,
}

impl ReconcileReport {
    /// Whether the pass changed anything
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty()
            && self.disconnected.is_empty()
            && self.reconnected.is_empty()
            && self.removed.is_empty()
    }
}

/// Slot table; only reachable through the registry lock
struct Slots<B: Bus> {
    entries: Vec<Option<Arc<Launcher<B>>>>,
    count: usize,
}

impl<B: Bus> Slots<B> {
    fn with_capacity(capacity: usize) -> Result<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailed)?;
        entries.resize_with(capacity, || None);
        Ok(Self { entries, count: 0 })
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, key: DeviceKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|l| l.key() == key))
    }

    fn position_of(&self, launcher: &Launcher<B>) -> Option<usize> {
        self.entries
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|l| std::ptr::eq(l.as_ref(), launcher)))
    }

    /// First empty slot, growing the table if there is none
    fn free_index(&mut self, max_capacity: Option<usize>) -> Result<usize> {
        if let Some(index) = self.entries.iter().position(Option::is_none) {
            return Ok(index);
        }

        let current = self.capacity();
        let mut target = (current * 2).max(1);
        if let Some(max) = max_capacity {
            target = target.min(max);
        }
        if target <= current {
            return Err(Error::RegistryFull { capacity: current });
        }

        self.entries
            .try_reserve_exact(target - current)
            .map_err(|_| Error::AllocationFailed)?;
        self.entries.resize_with(target, || None);
        debug!("Grew launcher registry from {} to {} slots", current, target);
        Ok(current)
    }

    fn insert_at(&mut self, index: usize, launcher: Arc<Launcher<B>>) -> Result<()> {
        let capacity = self.capacity();
        let slot = self
            .entries
            .get_mut(index)
            .ok_or(Error::IndexOutOfBounds { index, capacity })?;
        if slot.is_some() {
            return Err(Error::Inconsistent(format!(
                "slot {} already occupied",
                index
            )));
        }
        *slot = Some(launcher);
        self.count += 1;
        Ok(())
    }

    fn remove_index(&mut self, index: usize) -> Result<Arc<Launcher<B>>> {
        let capacity = self.capacity();
        let slot = self
            .entries
            .get_mut(index)
            .ok_or(Error::IndexOutOfBounds { index, capacity })?;
        if slot.is_none() {
            return Err(Error::NotFound);
        }
        if self.count == 0 {
            return Err(Error::CountZero);
        }
        let launcher = slot.take().ok_or(Error::NotFound)?;
        self.count -= 1;
        Ok(launcher)
    }

    fn occupied(&self) -> impl Iterator<Item = &Arc<Launcher<B>>> {
        self.entries.iter().flatten()
    }

    fn check_count(&self) -> Result<()> {
        let occupied = self.occupied().count();
        if occupied != self.count {
            return Err(Error::Inconsistent(format!(
                "count is {} but {} slots are occupied",
                self.count, occupied
            )));
        }
        Ok(())
    }
}

/// Table of known launchers
pub struct Registry<B: Bus> {
    this: Weak<Registry<B>>,
    bus: Arc<B>,
    slots: RwLock<Slots<B>>,
    max_capacity: Option<usize>,
    events: broadcast::Sender<LauncherEvent>,
}

impl<B: Bus> Registry<B> {
    /// Create an empty registry
    ///
    /// The table starts with `initial_capacity` slots and doubles when full,
    /// up to `max_capacity` if given.
    pub fn new(
        bus: Arc<B>,
        initial_capacity: usize,
        max_capacity: Option<usize>,
        events: broadcast::Sender<LauncherEvent>,
    ) -> Result<Arc<Self>> {
        if let Some(max) = max_capacity
            && max < initial_capacity
        {
            return Err(Error::Config(format!(
                "max capacity {} is below initial capacity {}",
                max, initial_capacity
            )));
        }
        let slots = Slots::with_capacity(initial_capacity)?;

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            bus,
            slots: RwLock::new(slots),
            max_capacity,
            events,
        }))
    }

    fn read_slots(&self) -> Result<RwLockReadGuard<'_, Slots<B>>> {
        self.slots.read().map_err(poisoned("registry"))
    }

    fn write_slots(&self) -> Result<RwLockWriteGuard<'_, Slots<B>>> {
        self.slots.write().map_err(poisoned("registry"))
    }

    fn publish(&self, event: LauncherEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Number of launchers in the table
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_slots()?.count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current number of slots
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.read_slots()?.capacity())
    }

    /// Look up a launcher by bus identity
    pub fn get(&self, key: DeviceKey) -> Result<Option<Arc<Launcher<B>>>> {
        let slots = self.read_slots()?;
        Ok(slots
            .position(key)
            .and_then(|index| slots.entries[index].clone()))
    }

    /// Merge a freshly enumerated device list into the table
    ///
    /// Devices that are not launchers are dropped before the table is
    /// touched. A launcher that cannot be added is recorded in the report's
    /// `failures`; the rest of the pass carries on.
    pub fn reconcile(&self, devices: Vec<B::Device>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut found = Vec::new();
        let mut present = HashSet::new();

        for device in devices {
            let key = self.bus.key(&device);
            let kind = match self.bus.identity_pair(&device) {
                Ok((vendor_id, product_id)) => classify(vendor_id, product_id),
                Err(e) => {
                    debug!("Skipping device {}: cannot read ids: {}", key, e);
                    LauncherKind::NotALauncher
                }
            };
            if !kind.is_launcher() {
                report.ignored += 1;
                continue;
            }
            if present.insert(key) {
                found.push((key, kind, device));
            }
        }

        // Dropped after the table lock below
        let mut retired: Vec<Retired<B>> = Vec::new();
        let mut slots = self.write_slots()?;

        // Disconnect pass
        for index in 0..slots.capacity() {
            let Some(launcher) = slots.entries[index].clone() else {
                continue;
            };
            let mut state = launcher.lock_state()?;
            let connected = present.contains(&launcher.key());

            if state.connected != connected {
                state.connected = connected;
                if connected {
                    info!("Launcher {} reconnected", launcher.key());
                    report.reconnected.push(launcher.key());
                } else {
                    info!(
                        "Launcher {} disconnected ({} references)",
                        launcher.key(),
                        state.ref_count
                    );
                    report.disconnected.push(launcher.key());
                }
                if !state.is_orphaned() {
                    self.publish(launcher.connectivity_event(&state));
                }
            }

            if state.is_orphaned() {
                slots.remove_index(index)?;
                retired.push(launcher.retire(&mut state));
                debug!("Removed launcher {} from slot {}", launcher.key(), index);
                report.removed.push(launcher.key());
                self.publish(LauncherEvent::Removed {
                    key: launcher.key(),
                });
            }
        }

        // Add pass
        for (key, kind, device) in found {
            if slots.position(key).is_some() {
                continue;
            }
            let index = match slots.free_index(self.max_capacity) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Cannot add launcher {}: {}", key, e);
                    report.failures.push((key, e));
                    continue;
                }
            };

            let launcher = Arc::new(Launcher::new(
                self.bus.clone(),
                self.this.clone(),
                &device,
                kind,
            ));
            slots.insert_at(index, launcher)?;
            info!("Added {} {} in slot {}", kind, key, index);
            report.added.push(key);
            self.publish(LauncherEvent::Arrived { key, kind });
        }

        drop(slots);
        drop(retired);
        Ok(report)
    }

    /// Remove a launcher whose last reference was just dropped
    ///
    /// Called by [`Launcher::dereference`] after it released the launcher
    /// lock. The condition is checked again under both locks, since another
    /// thread may have referenced the launcher, or a reconciliation may have
    /// removed it, in between. Returns whether this call removed it.
    pub(crate) fn collect(&self, launcher: &Launcher<B>) -> Result<bool> {
        let mut slots = self.write_slots()?;
        let mut state = launcher.lock_state()?;
        if !state.is_orphaned() {
            return Ok(false);
        }

        let index = slots.position_of(launcher).ok_or_else(|| {
            Error::Inconsistent(format!(
                "orphaned launcher {} is not in the registry",
                launcher.key()
            ))
        })?;
        slots.remove_index(index)?;
        let retired = launcher.retire(&mut state);
        drop(state);
        drop(slots);
        drop(retired);

        debug!("Collected launcher {} from slot {}", launcher.key(), index);
        self.publish(LauncherEvent::Removed {
            key: launcher.key(),
        });
        Ok(true)
    }

    /// Referenced snapshot of every launcher in the table
    ///
    /// Each launcher in the snapshot carries one extra reference, dropped
    /// again by [`LauncherArray::free`] or when the array is dropped.
    pub fn snapshot(&self) -> Result<LauncherArray<B>> {
        let slots = self.read_slots()?;
        slots.check_count()?;

        let mut launchers = Vec::with_capacity(slots.count);
        for launcher in slots.occupied() {
            let mut state = launcher.lock_state()?;
            if state.retired {
                return Err(Error::Inconsistent(format!(
                    "retired launcher {} still in the registry",
                    launcher.key()
                )));
            }
            state.ref_count += 1;
            launchers.push(launcher.clone());
        }
        Ok(LauncherArray::new(launchers))
    }

    /// Empty the table
    ///
    /// Unreferenced launchers are retired now. Referenced ones are marked
    /// disconnected and detached; they retire on their last dereference.
    /// Returns how many launchers were still referenced.
    pub fn drain(&self) -> Result<usize> {
        let mut retired = Vec::new();
        let mut slots = self.write_slots()?;
        let mut referenced = 0;

        for index in 0..slots.capacity() {
            if slots.entries[index].is_none() {
                continue;
            }
            let launcher = slots.remove_index(index)?;
            let mut state = launcher.lock_state()?;
            state.connected = false;
            state.detached = true;
            if state.ref_count == 0 {
                retired.push(launcher.retire(&mut state));
            } else {
                debug!(
                    "Launcher {} still has {} references, detaching",
                    launcher.key(),
                    state.ref_count
                );
                referenced += 1;
            }
        }

        drop(slots);
        drop(retired);
        Ok(referenced)
    }
}

impl<B: Bus> std::fmt::Debug for Registry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Registry");
        if let Ok(slots) = self.slots.read() {
            s.field("count", &slots.count)
                .field("capacity", &slots.capacity());
        }
        s.field("max_capacity", &self.max_capacity).finish()
    }
}
