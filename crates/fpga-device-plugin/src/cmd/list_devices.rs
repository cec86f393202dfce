//! One-shot inventory dump
//!
//! Prints what the daemon would serve: one entry per device type with the
//! socket and resource name it gets and the device ids it advertises.

use anyhow::Context;
use anyhow::Result;
use serde::Serialize;

use crate::config::ListDevicesArgs;
use crate::config::PluginConfig;
use crate::domain::CoLocationPolicy;
use crate::domain::Device;
use crate::domain::DeviceType;
use crate::domain::Inventory;
use crate::infrastructure::inventory::FileInventoryProvider;
use crate::infrastructure::inventory::InventoryProvider;

#[derive(Debug, Serialize)]
pub struct DeviceTypeReport<'a> {
    pub device_type: &'a DeviceType,
    pub resource_name: String,
    pub socket: String,
    pub advertised: Vec<&'a str>,
    pub devices: Vec<&'a Device>,
}

pub fn inventory_report<'a>(
    inventory: &'a Inventory,
    config: &PluginConfig,
) -> Vec<DeviceTypeReport<'a>> {
    let policy = CoLocationPolicy::new(config.placeholder_serial.clone());
    inventory
        .iter()
        .map(|(device_type, devices)| DeviceTypeReport {
            device_type,
            resource_name: device_type.resource_name(&config.resource_prefix),
            socket: config
                .plugin_dir
                .join(device_type.socket_name())
                .display()
                .to_string(),
            advertised: policy
                .advertised(devices)
                .into_iter()
                .map(|device| device.id.as_str())
                .collect(),
            devices: devices.values().collect(),
        })
        .collect()
}

pub async fn run_list_devices(args: ListDevicesArgs) -> Result<()> {
    let provider = FileInventoryProvider::new(args.inventory.inventory_file.clone());
    let devices = provider
        .devices()
        .await
        .map_err(|report| anyhow::anyhow!("{report:?}"))
        .with_context(|| format!("failed to read {}", provider.path().display()))?;

    let inventory = Inventory::from_devices(devices);
    let config = PluginConfig::from(&args.plugin);
    let report = inventory_report(&inventory, &config);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
