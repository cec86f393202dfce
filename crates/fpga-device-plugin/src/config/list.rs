use clap::Parser;

use crate::config::daemon::InventoryArgs;
use crate::config::daemon::PluginArgs;

#[derive(Parser, Clone, Debug)]
pub struct ListDevicesArgs {
    #[command(flatten)]
    pub inventory: InventoryArgs,

    #[command(flatten)]
    pub plugin: PluginArgs,
}
