use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::domain::device::DeviceMap;
use crate::domain::device::DeviceType;
use crate::domain::device::Inventory;

/// Three way difference between two inventory snapshots.
///
/// Every device type of either snapshot lands in exactly one of the four
/// sets. `added` and `updated` carry the device maps from the newer snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryDiff {
    pub added: BTreeMap<DeviceType, DeviceMap>,
    pub updated: BTreeMap<DeviceType, DeviceMap>,
    pub removed: BTreeSet<DeviceType>,
    pub unchanged: BTreeSet<DeviceType>,
}

impl InventoryDiff {
    pub fn between(previous: &Inventory, current: &Inventory) -> Self {
        let mut diff = Self::default();

        for (device_type, old_devices) in previous.iter() {
            match current.get(device_type) {
                Some(new_devices) if new_devices == old_devices => {
                    diff.unchanged.insert(device_type.clone());
                }
                Some(new_devices) => {
                    diff.updated
                        .insert(device_type.clone(), new_devices.clone());
                }
                None => {
                    diff.removed.insert(device_type.clone());
                }
            }
        }

        for (device_type, new_devices) in current.iter() {
            if !previous.contains(device_type) {
                diff.added.insert(device_type.clone(), new_devices.clone());
            }
        }

        diff
    }

    /// True when nothing needs to be applied.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}
