//! Referenced launcher snapshots

use crate::bus::Bus;
use crate::launcher::Launcher;
use common::{Error, Result};
use std::sync::Arc;
use tracing::warn;

/// A snapshot of the registry where every launcher holds one reference
///
/// Call [`LauncherArray::free`] to drop the references and see any error.
/// Dropping the array without freeing it drops them too, logging failures.
pub struct LauncherArray<B: Bus> {
    launchers: Vec<Arc<Launcher<B>>>,
    freed: bool,
}

impl<B: Bus> LauncherArray<B> {
    pub(crate) fn new(launchers: Vec<Arc<Launcher<B>>>) -> Self {
        Self {
            launchers,
            freed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Launcher<B>>> {
        self.launchers.iter()
    }

    pub fn get(&self, index: usize) -> Result<&Arc<Launcher<B>>> {
        self.launchers.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            capacity: self.launchers.len(),
        })
    }

    /// Drop the snapshot's references
    ///
    /// Every launcher is dereferenced even if one fails; the first error is
    /// returned.
    pub fn free(mut self) -> Result<()> {
        self.freed = true;
        let mut first_error = None;
        for launcher in self.launchers.drain(..) {
            if let Err(e) = launcher.dereference()
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<'a, B: Bus> IntoIterator for &'a LauncherArray<B> {
    type Item = &'a Arc<Launcher<B>>;
    type IntoIter = std::slice::Iter<'a, Arc<Launcher<B>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.launchers.iter()
    }
}

impl<B: Bus> std::fmt::Debug for LauncherArray<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.launchers.iter().map(|l| l.key()))
            .finish()
    }
}

impl<B: Bus> Drop for LauncherArray<B> {
    fn drop(&mut self) {
        if self.freed {
            return;
        }
        for launcher in self.launchers.drain(..) {
            if let Err(e) = launcher.dereference() {
                warn!("Failed to release launcher {}: {}", launcher.key(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use crate::registry::Registry;
    use tokio::sync::broadcast;

    fn populated(count: usize) -> (Arc<MockBus>, Arc<Registry<MockBus>>) {
        let bus = Arc::new(MockBus::new());
        let (tx, _rx) = broadcast::channel(16);
        let registry = Registry::new(bus.clone(), 4, None, tx).unwrap();
        for _ in 0..count {
            bus.plug_launcher();
        }
        registry.reconcile(bus.enumerate().unwrap()).unwrap();
        (bus, registry)
    }

    #[test]
    fn test_snapshot_references_each_launcher() {
        let (_bus, registry) = populated(3);
        let array = registry.snapshot().unwrap();

        assert_eq!(array.len(), 3);
        for launcher in &array {
            assert_eq!(launcher.ref_count().unwrap(), 1);
        }
        let held = array.get(0).unwrap().clone();
        array.free().unwrap();
        assert_eq!(held.ref_count().unwrap(), 0);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let (_bus, registry) = populated(1);
        let array = registry.snapshot().unwrap();
        assert!(matches!(
            array.get(1),
            Err(Error::IndexOutOfBounds {
                index: 1,
                capacity: 1
            })
        ));
    }

    #[test]
    fn test_drop_dereferences() {
        let (_bus, registry) = populated(2);
        let array = registry.snapshot().unwrap();
        let held: Vec<_> = array.iter().cloned().collect();
        drop(array);
        for launcher in held {
            assert_eq!(launcher.ref_count().unwrap(), 0);
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let (_bus, registry) = populated(0);
        let array = registry.snapshot().unwrap();
        assert!(array.is_empty());
        array.free().unwrap();
    }
}
