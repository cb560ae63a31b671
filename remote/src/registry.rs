//! The device registry (spec.md §4.4, C6): a grow-only vector indexed by
//! proxy-assigned id, plus the name→id side table `DEVICE_DEL` needs
//! (spec.md §9(c): "the integer interpretation is authoritative" — but
//! `DEVICE_DEL`'s JSON payload still names the device by string, so a side
//! table is the only way to resolve it back to an id).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::Device;
use crate::error::HandlerError;

pub struct DeviceSlot {
    pub device: Box<dyn Device>,
    pub name: String,
    /// Set only when the first `SET_IRQFD` for this device arrives
    /// (spec.md §4.4).
    pub created: bool,
}

/// Sparse array of devices plus the bookkeeping spec.md §4.4 describes.
pub struct Registry {
    devices: Vec<Option<DeviceSlot>>,
    name_to_id: HashMap<String, u64>,
    machine_creation_done: AtomicBool,
    on_machine_creation: Vec<Box<dyn FnOnce() + Send>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            devices: Vec::new(),
            name_to_id: HashMap::new(),
            machine_creation_done: AtomicBool::new(false),
            on_machine_creation: Vec::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Grows the vector if `id >= len`, then stores (spec.md §4.4's `add`).
    pub fn add(&mut self, id: u64, name: String, device: Box<dyn Device>) {
        let id = id as usize;
        if id >= self.devices.len() {
            self.devices.resize_with(id + 1, || None);
        }
        self.name_to_id.insert(name.clone(), id as u64);
        self.devices[id] = Some(DeviceSlot { device, name, created: false });
    }

    /// Bounds-checked lookup: `id >= nr_devices` is rejected (spec.md §9(a):
    /// the source's `>` is an off-by-one, reimplementation uses `≥`).
    pub fn get(&self, id: u64) -> Option<&DeviceSlot> {
        if id >= self.devices.len() as u64 {
            return None;
        }
        self.devices[id as usize].as_ref()
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut DeviceSlot> {
        if id >= self.devices.len() as u64 {
            return None;
        }
        self.devices[id as usize].as_mut()
    }

    pub fn id_by_name(&self, name: &str) -> Option<u64> {
        self.name_to_id.get(name).copied()
    }

    /// Unplugs the device named `name`, resolving name→id via the side
    /// table (spec.md §4.5: "DEVICE_DEL ... looks the device up by name").
    pub fn remove_by_name(&mut self, name: &str) -> Result<(), HandlerError> {
        let id = self
            .name_to_id
            .remove(name)
            .ok_or_else(|| HandlerError::UnknownDeviceName(name.to_string()))?;
        self.devices[id as usize] = None;
        Ok(())
    }

    /// Marks `id` created and, on the very first such transition across the
    /// whole registry, latches `machine_creation_done` and fires any
    /// deferred notifiers (spec.md §4.4).
    pub fn mark_created(&mut self, id: u64) -> Result<(), HandlerError> {
        let slot = self.get_mut(id).ok_or(HandlerError::NoDeviceAtId(id))?;
        slot.created = true;
        if !self.machine_creation_done.swap(true, Ordering::SeqCst) {
            for notifier in self.on_machine_creation.drain(..) {
                notifier();
            }
        }
        Ok(())
    }

    pub fn machine_creation_done(&self) -> bool {
        self.machine_creation_done.load(Ordering::SeqCst)
    }

    /// Registers a callback to run once machine creation latches, or
    /// immediately if it already has.
    pub fn on_machine_creation(&mut self, notifier: Box<dyn FnOnce() + Send>) {
        if self.machine_creation_done() {
            notifier();
        } else {
            self.on_machine_creation.push(notifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testdev::PciTestDevFactory;
    use crate::device::DeviceFactory;
    use serde_json::Map;

    fn testdev() -> Box<dyn Device> {
        PciTestDevFactory.create(&Map::new()).unwrap()
    }

    #[test]
    fn add_grows_sparse_vector() {
        let mut reg = Registry::new();
        reg.add(7, "d0".into(), testdev());
        assert_eq!(reg.len(), 8);
        assert!(reg.get(7).is_some());
        assert!(reg.get(3).is_none());
    }

    #[test]
    fn get_rejects_id_at_or_past_len() {
        let mut reg = Registry::new();
        reg.add(0, "d0".into(), testdev());
        assert!(reg.get(1).is_none());
        assert!(reg.get(0).is_some());
    }

    #[test]
    fn remove_by_name_resolves_via_side_table() {
        let mut reg = Registry::new();
        reg.add(7, "d0".into(), testdev());
        reg.remove_by_name("d0").unwrap();
        assert!(reg.get(7).is_none());
        assert!(matches!(reg.remove_by_name("d0"), Err(HandlerError::UnknownDeviceName(_))));
    }

    #[test]
    fn machine_creation_latches_once_and_fires_notifiers() {
        let mut reg = Registry::new();
        reg.add(0, "d0".into(), testdev());
        let fired = std::sync::Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        reg.on_machine_creation(Box::new(move || fired2.store(true, Ordering::SeqCst)));
        assert!(!reg.machine_creation_done());
        reg.mark_created(0).unwrap();
        assert!(reg.machine_creation_done());
        assert!(fired.load(Ordering::SeqCst));
    }
}
