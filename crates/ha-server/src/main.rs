//! Home Assistant Rust Server
//!
//! Main entry point for the Home Assistant Rust implementation.
//!
//! Usage: `homeassistant [CONFIG_DIR]` (defaults to `./config`).

mod bootstrap;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use ha_config::Config;
use ha_config_entries::ConfigEntries;
use ha_helpers::HomeAssistant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));
    let config = Config::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;

    bootstrap::init_tracing(&config.logger)?;
    info!(
        "Starting Home Assistant (Rust): {}",
        config.homeassistant.name
    );

    let hass = HomeAssistant::new();
    let entries = ConfigEntries::new(hass.clone(), Arc::new(bootstrap::integrations()));

    let imported = bootstrap::import_entries(&entries, &config.integrations)?;
    info!("Imported {} config entries", imported);

    for result in entries.setup_all().await {
        if let Err(err) = result {
            warn!("Config entry setup did not complete: {}", err);
        }
    }

    hass.start();
    info!("Home Assistant is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for result in entries.unload_all().await {
        if let Err(err) = result {
            warn!("Config entry unload failed: {}", err);
        }
    }
    hass.stop();

    Ok(())
}
