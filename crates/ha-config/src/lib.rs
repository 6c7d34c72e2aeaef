//! YAML configuration loading for Home Assistant
//!
//! Reads `configuration.yaml` from a config directory into a typed
//! [`Config`]. Supported tags:
//!
//! - `!secret key` - Substitute from the nearest secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//! - `!include path` - Include another YAML file
//!
//! # Example
//!
//! ```ignore
//! use ha_config::Config;
//!
//! let config = Config::load("/config")?;
//! for integration in &config.integrations {
//!     println!("{} ({})", integration.title(), integration.domain);
//! }
//! ```

mod config;
mod error;
mod loader;
mod secrets;

pub use config::{Config, CoreConfig, IntegrationConfig, LoggerConfig, CONFIG_FILE};
pub use error::{ConfigError, ConfigResult};
pub use loader::YamlLoader;
pub use secrets::{Secrets, SECRETS_FILE};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
