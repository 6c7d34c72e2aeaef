//! YAML loader with custom tag support
//!
//! - `!secret key` - value from the nearest `secrets.yaml`
//! - `!env_var NAME [default]` - environment variable, with optional fallback
//! - `!include path` - splice in another YAML file
//!
//! Any other tag is rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;

/// YAML loader rooted at a config directory
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, innermost last
    include_stack: Vec<PathBuf>,
}

impl YamlLoader {
    /// Create a new YAML loader for the given config directory
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            secrets: Secrets::new(config_dir.clone()),
            config_dir,
            include_stack: Vec::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.push(path.clone());
        let result = self.load_str(&content, &path);
        self.include_stack.pop();

        result
    }

    /// Process YAML text as if it were read from `source_path`
    pub fn load_str(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Option<Value> =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source: e,
            })?;

        self.resolve(value.unwrap_or(Value::Null), source_path)
    }

    fn resolve(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, source_path),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(k, v)| self.resolve(v, source_path).map(|v| (k, v)))
                .collect::<ConfigResult<serde_yaml::Mapping>>()
                .map(Value::Mapping),
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Resolving tag {} in {:?}", tag, source_path);

        match tag.as_str() {
            "!secret" => {
                let key = expect_str(&tag, tagged.value)?;
                self.secrets.get(source_path, &key)
            }
            "!env_var" => resolve_env_var(&tag, tagged.value),
            "!include" => {
                let relative = expect_str(&tag, tagged.value)?;
                let base = source_path.parent().unwrap_or(self.config_dir.as_path());
                let path = base.join(relative);
                if !path.exists() {
                    return Err(ConfigError::IncludeNotFound { path });
                }
                self.load_file(path)
            }
            _ => Err(ConfigError::UnknownTag {
                tag,
                path: source_path.to_path_buf(),
            }),
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

/// `!env_var NAME` or `!env_var NAME default`
fn resolve_env_var(tag: &str, value: Value) -> ConfigResult<Value> {
    let arg = expect_str(tag, value)?;
    let mut parts = arg.splitn(2, char::is_whitespace);
    let var = parts.next().unwrap_or_default().to_string();
    let default = parts.next().map(str::trim);

    match (std::env::var(&var), default) {
        (Ok(value), _) => Ok(Value::String(value)),
        (Err(_), Some(default)) => {
            debug!("Environment variable {} not set, using default", var);
            Ok(Value::String(default.to_string()))
        }
        (Err(_), None) => Err(ConfigError::EnvVarNotFound { var }),
    }
}

fn expect_str(tag: &str, value: Value) -> ConfigResult<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        other => Err(ConfigError::InvalidValue {
            key: tag.to_string(),
            reason: format!("expected a non-empty string, got {:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn load(dir: &TempDir, content: &str) -> ConfigResult<Value> {
        write_file(dir.path(), "configuration.yaml", content);
        YamlLoader::new(dir.path()).load_file("configuration.yaml")
    }

    #[test]
    fn test_plain_yaml() {
        let dir = TempDir::new().unwrap();
        let value = load(&dir, "homeassistant:\n  name: Home\n").unwrap();
        assert_eq!(value["homeassistant"]["name"], Value::String("Home".into()));
    }

    #[test]
    fn test_empty_file_is_null() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load(&dir, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_secret_inside_sequence() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "demo_key: hunter2\n");

        let value = load(&dir, "integrations:\n  - data:\n      api_key: !secret demo_key\n")
            .unwrap();
        assert_eq!(
            value["integrations"][0]["data"]["api_key"],
            Value::String("hunter2".into())
        );
    }

    #[test]
    fn test_env_var_with_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HA_CONFIG_TEST_PRESENT", "from-env");

        let value = load(
            &dir,
            "a: !env_var HA_CONFIG_TEST_PRESENT\nb: !env_var HA_CONFIG_TEST_ABSENT fallback\n",
        )
        .unwrap();
        assert_eq!(value["a"], Value::String("from-env".into()));
        assert_eq!(value["b"], Value::String("fallback".into()));

        let err = load(&dir, "a: !env_var HA_CONFIG_TEST_ABSENT\n").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { .. }));
    }

    #[test]
    fn test_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "demo.yaml", "- domain: demo\n");

        let value = load(&dir, "integrations: !include demo.yaml\n").unwrap();
        assert_eq!(
            value["integrations"][0]["domain"],
            Value::String("demo".into())
        );

        let err = load(&dir, "integrations: !include missing.yaml\n").unwrap_err();
        assert!(matches!(err, ConfigError::IncludeNotFound { .. }));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "loop.yaml", "again: !include configuration.yaml\n");

        let err = load(&dir, "start: !include loop.yaml\n").unwrap_err();
        assert!(matches!(err, ConfigError::CircularInclude { .. }));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir, "value: !lambda something\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTag { tag, .. } if tag == "!lambda"));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = YamlLoader::new(dir.path())
            .load_file("configuration.yaml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
