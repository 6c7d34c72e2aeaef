//! Startup plumbing: logging, integration list and config entry import

use anyhow::{anyhow, Context as _, Result};
use ha_config::{IntegrationConfig, LoggerConfig};
use ha_config_entries::{ConfigEntries, ConfigEntry, ConfigEntrySource, IntegrationRegistry};
use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::demo::{self, DemoIntegration};

/// Install the global subscriber
///
/// `RUST_LOG` wins over the `logger:` section when set.
pub fn init_tracing(logger: &LoggerConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logger.filter_directive())
            .with_context(|| format!("invalid logger configuration: {:?}", logger))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!(e))
}

/// Every integration this build ships
pub fn integrations() -> IntegrationRegistry {
    let registry = IntegrationRegistry::new();
    registry.register(demo::DOMAIN, || DemoIntegration);
    registry
}

/// Turn the `integrations:` list into config entries
///
/// Entries for unknown domains are still added; their setup fails with
/// `IntegrationNotFound`.
pub fn import_entries(entries: &ConfigEntries, configs: &[IntegrationConfig]) -> Result<usize> {
    let mut imported = 0;

    for config in configs {
        let mut entry = ConfigEntry::new(&config.domain, config.title())
            .with_data(config.data.clone())
            .with_source(ConfigEntrySource::Import)
            .with_polling_disabled(config.disable_polling);
        if let Some(ref unique_id) = config.unique_id {
            entry = entry.with_unique_id(unique_id);
        }
        if let Some(interval) = config.update_interval {
            entry
                .options
                .insert("update_interval".to_string(), json!(interval));
        }

        match entries.add(entry) {
            Ok(entry) => {
                debug!("Imported {} entry {}", entry.domain, entry.entry_id);
                imported += 1;
            }
            Err(ha_config_entries::ConfigEntriesError::AlreadyExists { domain, unique_id }) => {
                warn!(
                    "Skipping duplicate {} entry with unique_id {}",
                    domain, unique_id
                );
            }
            Err(err) => return Err(err).context("importing config entries"),
        }
    }

    Ok(imported)
}
