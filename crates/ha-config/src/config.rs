//! Typed `configuration.yaml`

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Main configuration file name
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub homeassistant: CoreConfig,
    pub logger: LoggerConfig,
    pub integrations: Vec<IntegrationConfig>,
}

/// `homeassistant:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Name of the installation
    pub name: String,
    /// IANA time zone name
    pub time_zone: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: "Home".to_string(),
            time_zone: None,
        }
    }
}

/// `logger:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Level for everything without an override
    pub default: String,
    /// Per-target overrides, e.g. `ha_helpers::update_coordinator: debug`
    pub logs: BTreeMap<String, String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            default: "info".to_string(),
            logs: BTreeMap::new(),
        }
    }
}

impl LoggerConfig {
    /// Filter directive in `tracing_subscriber::EnvFilter` syntax
    pub fn filter_directive(&self) -> String {
        std::iter::once(self.default.clone())
            .chain(
                self.logs
                    .iter()
                    .map(|(target, level)| format!("{}={}", target, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One entry of the `integrations:` list, imported as a config entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrationConfig {
    pub domain: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Poll interval in seconds
    #[serde(default)]
    pub update_interval: Option<u64>,
    #[serde(default)]
    pub disable_polling: bool,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl IntegrationConfig {
    pub fn update_interval(&self) -> Option<Duration> {
        self.update_interval.map(Duration::from_secs)
    }

    /// Title, falling back to the domain
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.domain)
    }
}

impl Config {
    /// Load `configuration.yaml` from `config_dir`
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let value = YamlLoader::new(config_dir.as_ref()).load_file(CONFIG_FILE)?;
        Self::from_value(value)
    }

    /// Build from an already resolved YAML document
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        let config: Config = match value {
            Value::Null => Config::default(),
            value => {
                serde_yaml::from_value(value).map_err(|e| ConfigError::Schema { source: e })?
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (index, integration) in self.integrations.iter().enumerate() {
            if integration.domain.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("integrations[{}].domain", index),
                    reason: "must not be empty".to_string(),
                });
            }
            if integration.update_interval == Some(0) {
                return Err(ConfigError::InvalidValue {
                    key: format!("integrations[{}].update_interval", index),
                    reason: "must be at least one second".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const FULL: &str = r#"
homeassistant:
  name: Cabin
logger:
  default: warn
  logs:
    ha_helpers::update_coordinator: debug
integrations:
  - domain: demo
    title: Backyard sensor
    unique_id: backyard
    update_interval: 30
    data:
      failure_rate: 0.2
      api_key: !secret demo_key
  - domain: demo
    disable_polling: true
"#;

    fn config_dir(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), content).unwrap();
        fs::write(dir.path().join("secrets.yaml"), "demo_key: abc123\n").unwrap();
        dir
    }

    #[test]
    fn test_full_config() {
        let dir = config_dir(FULL);
        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.homeassistant.name, "Cabin");
        assert_eq!(
            config.logger.filter_directive(),
            "warn,ha_helpers::update_coordinator=debug"
        );

        let backyard = &config.integrations[0];
        assert_eq!(backyard.title(), "Backyard sensor");
        assert_eq!(backyard.update_interval(), Some(Duration::from_secs(30)));
        assert_eq!(backyard.data["api_key"], serde_json::json!("abc123"));
        assert_eq!(backyard.data["failure_rate"], serde_json::json!(0.2));

        let second = &config.integrations[1];
        assert_eq!(second.title(), "demo");
        assert!(second.disable_polling);
        assert_eq!(second.update_interval(), None);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = config_dir("");
        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.homeassistant.name, "Home");
        assert_eq!(config.logger.filter_directive(), "info");
        assert!(config.integrations.is_empty());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = config_dir("integrations:\n  - domain: demo\n    update_interval: 0\n");
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key, .. } if key.ends_with("update_interval")
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = config_dir("integrations:\n  - domain: demo\n    polling: false\n");
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }
}
