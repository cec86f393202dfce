use anyhow::Result;
use clap::Parser;
use fpga_device_plugin::cmd::run_daemon;
use fpga_device_plugin::cmd::run_list_devices;
use fpga_device_plugin::config::Cli;
use fpga_device_plugin::config::Commands;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = utils::logging::init();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::ListDevices(list_args) => run_list_devices(list_args).await,
    }
}
