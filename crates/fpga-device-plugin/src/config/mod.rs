pub mod cli;
pub mod daemon;
pub mod list;

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration shared by the reconciler and every device type server.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Kubelet registration socket.
    pub kubelet_socket: PathBuf,
    /// Directory holding the per device type sockets.
    pub plugin_dir: PathBuf,
    /// Resource name prefix, e.g. `xilinx.com/fpga`.
    pub resource_prefix: String,
    /// Serial number that opts devices out of co-location.
    pub placeholder_serial: String,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub inventory_timeout: Duration,
    pub readiness_timeout: Duration,
    pub stop_timeout: Duration,
    pub inventory_failure_policy: InventoryFailurePolicy,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            kubelet_socket: PathBuf::from("/var/lib/kubelet/device-plugins/kubelet.sock"),
            plugin_dir: PathBuf::from("/var/lib/kubelet/device-plugins"),
            resource_prefix: "xilinx.com/fpga".to_string(),
            placeholder_serial: "F1-Node".to_string(),
            poll_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(75),
            inventory_timeout: Duration::from_secs(30),
            readiness_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
            inventory_failure_policy: InventoryFailurePolicy::Retry,
        }
    }
}

impl PluginConfig {
    /// Deadline for the whole process shutdown. Servers stop concurrently and
    /// each stop joins its serving task and then its streams, both bounded by
    /// `stop_timeout`.
    pub fn shutdown_timeout(&self) -> Duration {
        self.stop_timeout * 3
    }
}

impl From<&PluginArgs> for PluginConfig {
    fn from(args: &PluginArgs) -> Self {
        Self {
            kubelet_socket: args.kubelet_socket.clone(),
            plugin_dir: args.device_plugin_dir.clone(),
            resource_prefix: args.resource_prefix.clone(),
            placeholder_serial: args.placeholder_serial.clone(),
            ..Self::default()
        }
    }
}

impl From<&DaemonArgs> for PluginConfig {
    fn from(args: &DaemonArgs) -> Self {
        Self {
            poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
            retry_backoff: Duration::from_secs(args.retry_backoff_secs),
            inventory_timeout: Duration::from_secs(args.inventory_timeout_secs.max(1)),
            readiness_timeout: Duration::from_secs(args.readiness_timeout_secs.max(1)),
            stop_timeout: Duration::from_secs(args.stop_timeout_secs.max(1)),
            inventory_failure_policy: args.inventory_failure_policy,
            ..Self::from(&args.plugin)
        }
    }
}

pub use cli::*;
pub use daemon::*;
pub use list::*;
