use clap::{Parser, Subcommand};
use utils::version;

use crate::config::daemon::DaemonArgs;
use crate::config::list::ListDevicesArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugin daemon
    Daemon(Box<DaemonArgs>),
    /// Print the current FPGA inventory grouped by device type
    #[command(name = "list-devices")]
    ListDevices(ListDevicesArgs),
}
