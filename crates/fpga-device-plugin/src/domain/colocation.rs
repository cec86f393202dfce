//! Serial number co-location
//!
//! Functions of one physical card report the same serial number and must be
//! advertised as a single device and allocated together. The placeholder
//! serial is reported by platforms that cannot tell cards apart (e.g. every
//! F1 instance slot), so devices carrying it stay independent.

use std::collections::HashSet;

use tracing::debug;
use tracing::warn;

use crate::domain::device::Device;
use crate::domain::device::DeviceMap;

#[derive(Debug, Clone)]
pub struct CoLocationPolicy {
    placeholder_serial: String,
}

impl CoLocationPolicy {
    pub fn new(placeholder_serial: impl Into<String>) -> Self {
        Self {
            placeholder_serial: placeholder_serial.into(),
        }
    }

    pub fn is_placeholder(&self, serial: &str) -> bool {
        serial.eq_ignore_ascii_case(&self.placeholder_serial)
    }

    /// Serial number the device shares with its siblings, if any.
    fn shared_serial<'a>(&self, device: &'a Device) -> Option<&'a str> {
        let serial = device.serial_number.as_str();
        if serial.is_empty() || self.is_placeholder(serial) {
            None
        } else {
            Some(serial)
        }
    }

    /// Devices to advertise: one representative per real serial number,
    /// every placeholder device, and nothing without a serial number.
    pub fn advertised<'a>(&self, devices: &'a DeviceMap) -> Vec<&'a Device> {
        let mut seen_serials = HashSet::new();
        let mut advertised = Vec::new();

        for device in devices.values() {
            if device.serial_number.is_empty() {
                warn!(device_id = %device.id, "device has an empty serial number, not advertising it");
                continue;
            }
            if self.is_placeholder(&device.serial_number) {
                advertised.push(device);
                continue;
            }
            if !seen_serials.insert(device.serial_number.as_str()) {
                debug!(
                    device_id = %device.id,
                    serial_number = %device.serial_number,
                    "device with the same serial number already advertised"
                );
                continue;
            }
            advertised.push(device);
        }

        advertised
    }

    /// Requested ids, each once, followed by every co-located sibling not
    /// already requested. Ids unknown to `devices` are kept as-is and pull in
    /// nothing.
    pub fn expand(&self, requested: &[String], devices: &DeviceMap) -> Vec<String> {
        let mut included = HashSet::new();
        let mut expanded: Vec<String> = requested
            .iter()
            .filter(|id| included.insert(id.to_string()))
            .cloned()
            .collect();

        for id in requested {
            let Some(serial) = devices.get(id).and_then(|d| self.shared_serial(d)) else {
                continue;
            };
            for sibling in devices.values() {
                if sibling.serial_number == serial && included.insert(sibling.id.clone()) {
                    expanded.push(sibling.id.clone());
                }
            }
        }

        expanded
    }
}
