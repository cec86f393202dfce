//! Inventory polling and server registry
//!
//! The [`Reconciler`] is the only writer of the inventory and of the server
//! registry. Every poll it fetches the device list, diffs it against the
//! previous inventory and applies the diff: added device types get a fresh
//! [`DeviceTypeServer`], removed ones are stopped before the next poll and
//! updated ones receive a new snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use error_stack::Report;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::InventoryFailurePolicy;
use crate::config::PluginConfig;
use crate::domain::Device;
use crate::domain::DeviceMap;
use crate::domain::DeviceType;
use crate::domain::Inventory;
use crate::domain::InventoryDiff;
use crate::infrastructure::inventory::InventoryError;
use crate::infrastructure::inventory::InventoryProvider;
use crate::platform::k8s::DeviceTypeServer;
use crate::platform::k8s::ServerState;

struct ServerEntry {
    server: DeviceTypeServer,
    /// Start and registration task, `None` once joined.
    launch: Option<JoinHandle<()>>,
}

impl ServerEntry {
    fn launching(&self) -> bool {
        self.launch.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

pub struct Reconciler {
    provider: Arc<dyn InventoryProvider>,
    config: PluginConfig,
    inventory: Inventory,
    servers: BTreeMap<DeviceType, ServerEntry>,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn InventoryProvider>, config: PluginConfig) -> Self {
        Self {
            provider,
            config,
            inventory: Inventory::new(),
            servers: BTreeMap::new(),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn server(&self, device_type: &DeviceType) -> Option<&DeviceTypeServer> {
        self.servers.get(device_type).map(|entry| &entry.server)
    }

    pub fn device_types(&self) -> impl Iterator<Item = &DeviceType> {
        self.servers.keys()
    }

    /// Poll and reconcile until `token` is cancelled, then stop every server.
    #[tracing::instrument(skip_all)]
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            "polling device inventory every {:?}",
            self.config.poll_interval
        );

        loop {
            match self.refresh_inventory(&token).await {
                Ok(Some(current)) => {
                    let diff = self.reconcile(current).await;
                    if !diff.is_empty() {
                        info!(
                            added = ?diff.added.keys().collect::<Vec<_>>(),
                            updated = ?diff.updated.keys().collect::<Vec<_>>(),
                            removed = ?diff.removed,
                            "applied inventory changes"
                        );
                    }
                }
                Ok(None) => break,
                Err(err) => match self.config.inventory_failure_policy {
                    InventoryFailurePolicy::Retry => {
                        error!("failed to get FPGA devices, retrying next cycle: {err:?}");
                    }
                    InventoryFailurePolicy::Abandon => {
                        error!("failed to get FPGA devices, polling abandoned: {err:?}");
                        token.cancelled().await;
                        break;
                    }
                },
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// Fetch the device list, retrying once after the backoff.
    ///
    /// Returns `Ok(None)` when `token` is cancelled while waiting.
    pub async fn refresh_inventory(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<Inventory>, Report<InventoryError>> {
        let first = tokio::select! {
            _ = token.cancelled() => return Ok(None),
            result = self.fetch() => result,
        };
        let devices = match first {
            Ok(devices) => devices,
            Err(err) => {
                warn!(
                    "failed to get FPGA devices, retrying in {:?}: {err:?}",
                    self.config.retry_backoff
                );
                tokio::select! {
                    _ = token.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.config.retry_backoff) => {}
                }
                tokio::select! {
                    _ = token.cancelled() => return Ok(None),
                    result = self.fetch() => result?,
                }
            }
        };

        Ok(Some(Inventory::from_devices(devices)))
    }

    async fn fetch(&self) -> Result<Vec<Device>, Report<InventoryError>> {
        let timeout = self.config.inventory_timeout;
        tokio::time::timeout(timeout, self.provider.devices())
            .await
            .map_err(|_| Report::new(InventoryError::Timeout { timeout }))?
    }

    /// Apply the difference between the held inventory and `current`.
    pub async fn reconcile(&mut self, current: Inventory) -> InventoryDiff {
        self.revive_servers().await;

        let diff = InventoryDiff::between(&self.inventory, &current);

        for (device_type, devices) in &diff.added {
            info!(%device_type, "new device type with {} device(s)", devices.len());
            let server = DeviceTypeServer::new(device_type.clone(), &self.config);
            let launch = spawn_launch(server.clone(), devices.clone());
            self.servers.insert(
                device_type.clone(),
                ServerEntry {
                    server,
                    launch: Some(launch),
                },
            );
        }

        for device_type in &diff.removed {
            info!(%device_type, "device type removed");
            if let Some(entry) = self.servers.remove(device_type) {
                stop_entry(entry).await;
            }
        }

        for (device_type, devices) in &diff.updated {
            match self.servers.get(device_type) {
                Some(entry) => {
                    if entry.server.update(devices.clone()) {
                        debug!(%device_type, "published updated device snapshot");
                    }
                }
                None => warn!(%device_type, "no server for updated device type"),
            }
        }

        self.inventory = current;
        diff
    }

    /// Replace servers that are no longer reachable by the kubelet: stopped
    /// ones and serving ones whose socket was removed (kubelet restart).
    async fn revive_servers(&mut self) {
        let mut stale = Vec::new();
        for (device_type, entry) in &self.servers {
            if entry.launching() {
                continue;
            }
            let revive = match entry.server.state().await {
                ServerState::Stopped => true,
                ServerState::Serving => !entry.server.socket_path().exists(),
                ServerState::Created | ServerState::Starting => false,
            };
            if revive {
                stale.push(device_type.clone());
            }
        }

        for device_type in stale {
            let Some(devices) = self.inventory.get(&device_type).cloned() else {
                continue;
            };
            let Some(entry) = self.servers.remove(&device_type) else {
                continue;
            };
            info!(%device_type, "restarting device plugin server");
            stop_entry(entry).await;

            let server = DeviceTypeServer::new(device_type.clone(), &self.config);
            let launch = spawn_launch(server.clone(), devices);
            self.servers.insert(
                device_type,
                ServerEntry {
                    server,
                    launch: Some(launch),
                },
            );
        }
    }

    /// Stop every server concurrently.
    pub async fn shutdown(&mut self) {
        info!("stopping {} device plugin server(s)", self.servers.len());
        let entries = std::mem::take(&mut self.servers);
        join_all(entries.into_values().map(stop_entry)).await;
    }

    /// Wait for every in-flight launch.
    #[cfg(test)]
    pub(crate) async fn settle(&mut self) {
        for entry in self.servers.values_mut() {
            if let Some(launch) = entry.launch.take() {
                let _ = launch.await;
            }
        }
    }
}

fn spawn_launch(server: DeviceTypeServer, devices: DeviceMap) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = server.launch(devices).await {
            error!(
                device_type = %server.device_type(),
                "could not launch device plugin server, did you enable the device plugin feature gate? {err:?}"
            );
        }
    })
}

async fn stop_entry(entry: ServerEntry) {
    if let Some(launch) = entry.launch {
        launch.abort();
    }
    if let Err(err) = entry.server.stop().await {
        error!(
            device_type = %entry.server.device_type(),
            "failed to stop device plugin server: {err:?}"
        );
    }
}
