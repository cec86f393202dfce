use std::sync::Arc;

use anyhow::Result;
use utils::version;

use crate::app::Application;
use crate::config::DaemonArgs;
use crate::config::PluginConfig;
use crate::infrastructure::inventory::FileInventoryProvider;

pub async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    tracing::info!("Starting FPGA device plugin {}", &**version::VERSION);

    let config = PluginConfig::from(&daemon_args);
    tracing::info!(
        plugin_dir = %config.plugin_dir.display(),
        kubelet_socket = %config.kubelet_socket.display(),
        resource_prefix = %config.resource_prefix,
        "device plugin configuration"
    );

    let provider = FileInventoryProvider::new(daemon_args.inventory.inventory_file.clone());
    let app = Application::new(config, Arc::new(provider));
    app.run().await?;

    Ok(())
}
