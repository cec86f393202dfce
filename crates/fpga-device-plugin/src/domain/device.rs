//! FPGA device inventory model
//!
//! A [`Device`] is one PCI function of a card as seen by the host. Devices
//! that run the same shell and firmware share a [`DeviceType`] and are served
//! through one kubelet endpoint. Equality on every type here is plain value
//! equality, which is what the reconciler diffs on.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::Deserialize;
use serde::Serialize;

/// Devices of one type keyed by device id, ordered by id.
pub type DeviceMap = BTreeMap<String, Device>;

/// Host device nodes exposed by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNodes {
    /// Management function node; absent when only the user function is
    /// passed through to a virtual machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<String>,
    pub user: String,
    /// Streaming DMA node, present only on devices that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dma: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// PCI bus/device/function identifier, e.g. `0000:01:00.1`.
    pub id: String,
    /// Card serial number. Functions of one card report the same value.
    #[serde(default)]
    pub serial_number: String,
    pub shell_version: String,
    pub firmware_timestamp: String,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    pub nodes: DeviceNodes,
}

fn default_healthy() -> bool {
    true
}

impl Device {
    pub fn device_type(&self) -> DeviceType {
        DeviceType::new(&self.shell_version, &self.firmware_timestamp)
    }

    /// Kubelet health string for this device.
    pub fn health(&self) -> &'static str {
        if self.healthy {
            device_plugin_pb::HEALTHY
        } else {
            device_plugin_pb::UNHEALTHY
        }
    }

    /// Host device nodes to grant, in management, user, dma order.
    pub fn node_paths(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .management
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.nodes.user.as_str()))
            .chain(self.nodes.dma.as_deref())
            .filter(|path| !path.is_empty())
    }
}

/// Grouping key `<shell version>-<firmware timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[serde(transparent)]
pub struct DeviceType(String);

impl DeviceType {
    pub fn new(shell_version: &str, firmware_timestamp: &str) -> Self {
        Self(format!("{shell_version}-{firmware_timestamp}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the endpoint socket inside the plugin directory.
    pub fn socket_name(&self) -> String {
        format!("{}-fpga.sock", self.0)
    }

    /// Extended resource name announced to the kubelet.
    pub fn resource_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.0)
    }
}

impl From<&str> for DeviceType {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Devices grouped by type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    groups: BTreeMap<DeviceType, DeviceMap>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group a flat device list by [`DeviceType`]. A repeated id replaces
    /// the earlier record.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut inventory = Self::new();
        for device in devices {
            inventory
                .groups
                .entry(device.device_type())
                .or_default()
                .insert(device.id.clone(), device);
        }
        inventory
    }

    pub fn get(&self, device_type: &DeviceType) -> Option<&DeviceMap> {
        self.groups.get(device_type)
    }

    pub fn contains(&self, device_type: &DeviceType) -> bool {
        self.groups.contains_key(device_type)
    }

    pub fn insert(&mut self, device_type: DeviceType, devices: DeviceMap) {
        self.groups.insert(device_type, devices);
    }

    pub fn remove(&mut self, device_type: &DeviceType) -> Option<DeviceMap> {
        self.groups.remove(device_type)
    }

    pub fn device_types(&self) -> impl Iterator<Item = &DeviceType> {
        self.groups.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceType, &DeviceMap)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
