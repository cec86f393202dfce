use std::sync::Arc;

use anyhow::Result;

use crate::app::tasks::Tasks;
use crate::config::PluginConfig;
use crate::infrastructure::inventory::InventoryProvider;

/// Application core structure with explicit dependencies
pub struct Application {
    config: PluginConfig,
    provider: Arc<dyn InventoryProvider>,
}

impl Application {
    pub fn new(config: PluginConfig, provider: Arc<dyn InventoryProvider>) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<dyn InventoryProvider> {
        self.provider.clone()
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        if let Err(e) = tasks.spawn_all_tasks(self) {
            tracing::error!("Failed to spawn application tasks: {}", e);
            return Err(e);
        }

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
