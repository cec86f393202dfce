//! Command layer - Entry points for the device plugin subcommands

pub mod daemon;
pub mod list_devices;

pub use daemon::run_daemon;
pub use list_devices::run_list_devices;
