//! Config Entry types
//!
//! A ConfigEntry represents a single instance of an integration's configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::state_machine::InvalidTransition;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being set up
    SetupInProgress,
    /// Successfully set up
    Loaded,
    /// Setup failed; needs a reload to try again
    SetupError,
    /// Setup reported not ready; another attempt is scheduled
    SetupRetry,
    /// Version migration failed (terminal)
    MigrationError,
    /// Currently unloading
    UnloadInProgress,
    /// Unload failed (terminal)
    FailedUnload,
}

impl std::fmt::Display for ConfigEntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigEntryState::NotLoaded => "not_loaded",
            ConfigEntryState::SetupInProgress => "setup_in_progress",
            ConfigEntryState::Loaded => "loaded",
            ConfigEntryState::SetupError => "setup_error",
            ConfigEntryState::SetupRetry => "setup_retry",
            ConfigEntryState::MigrationError => "migration_error",
            ConfigEntryState::UnloadInProgress => "unload_in_progress",
            ConfigEntryState::FailedUnload => "failed_unload",
        };
        f.write_str(s)
    }
}

/// Source of the config entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured by the user
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// Found by discovery
    Discovery,
    /// Created by the system itself
    System,
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    /// Disabled by the user
    User,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g., "demo")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Configuration data handed to the integration
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// User-configurable options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    /// Optional unique identifier for duplicate prevention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Origin type
    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// Per-entry setup/unload lock (not persisted)
    /// Wrapped in Arc so ConfigEntry can still be Clone
    #[serde(skip)]
    pub setup_lock: Arc<Mutex<()>>,

    /// Number of setup retry attempts (not persisted)
    #[serde(skip, default)]
    pub tries: u32,

    /// Disable background polling
    #[serde(default)]
    pub pref_disable_polling: bool,

    /// What disabled this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            setup_lock: Arc::new(Mutex::new(())),
            tries: 0,
            pref_disable_polling: false,
            disabled_by: None,
            created_at: Utc::now(),
        }
    }

    /// Set entry data
    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    /// Set entry options
    pub fn with_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    /// Set unique_id
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Set source
    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    /// Turn automatic polling off for this entry's coordinators
    pub fn with_polling_disabled(mut self, disabled: bool) -> Self {
        self.pref_disable_polling = disabled;
        self
    }

    /// Mark the entry disabled
    pub fn with_disabled_by(mut self, disabled_by: Option<ConfigEntryDisabledBy>) -> Self {
        self.disabled_by = disabled_by;
        self
    }

    /// Check if entry is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    /// Check if entry is loaded
    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Look up a value in options first, then in data
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key).or_else(|| self.data.get(key))
    }

    /// Move to `new_state`, enforcing the lifecycle graph
    ///
    /// The retry counter survives only between `SetupRetry` and the next
    /// `SetupInProgress`; any other state resets it.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state = self.state.try_transition(new_state)?;
        self.reason = reason;

        if !matches!(
            new_state,
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress
        ) {
            self.tries = 0;
        }

        Ok(())
    }

    /// Increment the retry counter and return the new count
    pub fn increment_tries(&mut self) -> u32 {
        self.tries += 1;
        self.tries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_entry_builder() {
        let mut data = HashMap::new();
        data.insert("host".to_string(), json!("192.168.1.1"));

        let entry = ConfigEntry::new("demo", "Backyard")
            .with_data(data)
            .with_unique_id("backyard")
            .with_source(ConfigEntrySource::Import)
            .with_polling_disabled(true);

        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
        assert_eq!(entry.unique_id.as_deref(), Some("backyard"));
        assert_eq!(entry.source, ConfigEntrySource::Import);
        assert!(entry.pref_disable_polling);
        assert!(!entry.is_disabled());
    }

    #[test]
    fn test_options_override_data() {
        let mut data = HashMap::new();
        data.insert("update_interval".to_string(), json!(30));
        let mut options = HashMap::new();
        options.insert("update_interval".to_string(), json!(60));

        let entry = ConfigEntry::new("demo", "Test")
            .with_data(data)
            .with_options(options);

        assert_eq!(entry.get("update_interval"), Some(&json!(60)));
        assert_eq!(entry.get("missing"), None);
    }

    #[test]
    fn test_tries_reset_outside_retry_loop() {
        let mut entry = ConfigEntry::new("demo", "Test");
        entry
            .try_set_state(ConfigEntryState::SetupInProgress, None)
            .unwrap();
        entry.increment_tries();
        entry
            .try_set_state(ConfigEntryState::SetupRetry, Some("offline".into()))
            .unwrap();
        assert_eq!(entry.tries, 1);

        entry
            .try_set_state(ConfigEntryState::SetupInProgress, None)
            .unwrap();
        entry.try_set_state(ConfigEntryState::Loaded, None).unwrap();
        assert_eq!(entry.tries, 0);
        assert!(entry.reason.is_none());
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut entry = ConfigEntry::new("demo", "Test");
        assert!(entry.try_set_state(ConfigEntryState::Loaded, None).is_err());
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    }

    #[test]
    fn test_runtime_fields_not_serialized() {
        let mut entry = ConfigEntry::new("demo", "Test").with_unique_id("abc");
        entry.state = ConfigEntryState::Loaded;
        entry.tries = 3;

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("state").is_none());
        assert!(json.get("tries").is_none());

        let parsed: ConfigEntry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.state, ConfigEntryState::NotLoaded);
        assert_eq!(parsed.unique_id.as_deref(), Some("abc"));
    }
}
