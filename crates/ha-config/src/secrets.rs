//! `secrets.yaml` lookup
//!
//! A `!secret` is resolved from the `secrets.yaml` next to the file that
//! references it, then from each parent directory up to the config
//! directory. Files are parsed once and cached.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// File name searched for secrets
pub const SECRETS_FILE: &str = "secrets.yaml";

/// Cached secrets files below one config directory
#[derive(Debug, Default)]
pub struct Secrets {
    config_dir: PathBuf,
    cache: HashMap<PathBuf, HashMap<String, Value>>,
}

impl Secrets {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            cache: HashMap::new(),
        }
    }

    /// Resolve `key` for a document at `requester`
    pub fn get(&mut self, requester: &Path, key: &str) -> ConfigResult<Value> {
        let mut dir = requester.parent().map(Path::to_path_buf);

        while let Some(current) = dir {
            if let Some(value) = self.load_dir(&current)?.get(key) {
                debug!("Secret {} resolved from {:?}", key, current);
                return Ok(value.clone());
            }
            if current == self.config_dir || !current.starts_with(&self.config_dir) {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        Err(ConfigError::SecretNotFound {
            key: key.to_string(),
            path: requester.to_path_buf(),
        })
    }

    fn load_dir(&mut self, dir: &Path) -> ConfigResult<&HashMap<String, Value>> {
        if !self.cache.contains_key(dir) {
            let secrets = read_secrets(&dir.join(SECRETS_FILE))?;
            self.cache.insert(dir.to_path_buf(), secrets);
        }
        Ok(&self.cache[dir])
    }
}

fn read_secrets(path: &Path) -> ConfigResult<HashMap<String, Value>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    // An empty file parses as null
    let secrets: Option<HashMap<String, Value>> =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })?;
    let secrets = secrets.unwrap_or_default();

    debug!("Loaded {} secrets from {:?}", secrets.len(), path);
    Ok(secrets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_nearest_file_wins() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("packages");
        fs::create_dir(&nested).unwrap();
        fs::write(
            dir.path().join(SECRETS_FILE),
            "api_key: root\nport: 8123\n",
        )
        .unwrap();
        fs::write(nested.join(SECRETS_FILE), "api_key: nested\n").unwrap();

        let mut secrets = Secrets::new(dir.path());
        let requester = nested.join("demo.yaml");

        assert_eq!(
            secrets.get(&requester, "api_key").unwrap(),
            Value::String("nested".into())
        );
        // Falls back to the parent directory
        assert_eq!(secrets.get(&requester, "port").unwrap().as_u64(), Some(8123));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        let mut secrets = Secrets::new(dir.path());

        let err = secrets
            .get(&dir.path().join("configuration.yaml"), "nope")
            .unwrap_err();
        assert!(matches!(err, ConfigError::SecretNotFound { key, .. } if key == "nope"));
    }

    #[test]
    fn test_empty_secrets_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SECRETS_FILE), "").unwrap();
        let mut secrets = Secrets::new(dir.path());

        assert!(secrets
            .get(&dir.path().join("configuration.yaml"), "anything")
            .is_err());
    }
}
