use clap::Parser;
use clap::ValueEnum;
use std::path::PathBuf;

/// What the poll loop does once the inventory retry after the backoff has also failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InventoryFailurePolicy {
    /// Keep the last good inventory and poll again on the normal cadence
    #[default]
    Retry,
    /// Stop polling; already running servers keep serving until shutdown
    Abandon,
}

/// Where device records come from
#[derive(Parser, Clone, Debug)]
pub struct InventoryArgs {
    #[arg(
        long,
        env = "FPGA_INVENTORY_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML or JSON file listing the FPGA device functions on this node"
    )]
    pub inventory_file: PathBuf,
}

/// Naming and placement of the per device type endpoints
#[derive(Parser, Clone, Debug)]
pub struct PluginArgs {
    #[arg(
        long,
        env = "KUBELET_SOCKET",
        default_value = "/var/lib/kubelet/device-plugins/kubelet.sock",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubelet registration socket"
    )]
    pub kubelet_socket: PathBuf,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_DIR",
        default_value = "/var/lib/kubelet/device-plugins",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory in which the per device type sockets are created"
    )]
    pub device_plugin_dir: PathBuf,

    #[arg(
        long,
        env = "FPGA_RESOURCE_PREFIX",
        default_value = "xilinx.com/fpga",
        help = "Resource name prefix, the device type is appended as <prefix>-<type>"
    )]
    pub resource_prefix: String,

    #[arg(
        long,
        env = "FPGA_PLACEHOLDER_SERIAL",
        default_value = "F1-Node",
        help = "Serial number that marks devices as independent even when it is shared"
    )]
    pub placeholder_serial: String,
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub inventory: InventoryArgs,

    #[command(flatten)]
    pub plugin: PluginArgs,

    #[arg(
        long,
        env = "FPGA_POLL_INTERVAL_SECS",
        default_value = "5",
        help = "Seconds between two inventory polls"
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long,
        env = "FPGA_RETRY_BACKOFF_SECS",
        default_value = "75",
        help = "Seconds to wait before retrying a failed inventory read"
    )]
    pub retry_backoff_secs: u64,

    #[arg(
        long,
        env = "FPGA_INVENTORY_TIMEOUT_SECS",
        default_value = "30",
        help = "Upper bound for a single inventory read"
    )]
    pub inventory_timeout_secs: u64,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds to wait for a freshly bound endpoint to accept connections"
    )]
    pub readiness_timeout_secs: u64,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds to wait for a server's tasks to finish when it is stopped"
    )]
    pub stop_timeout_secs: u64,

    #[arg(
        long,
        env = "FPGA_INVENTORY_FAILURE_POLICY",
        value_enum,
        default_value_t = InventoryFailurePolicy::Retry,
        help = "Behaviour once an inventory read and its retry have both failed"
    )]
    pub inventory_failure_policy: InventoryFailurePolicy,
}
