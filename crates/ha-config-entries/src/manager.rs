//! Config Entries Manager
//!
//! Manages the lifecycle of configuration entries.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use ha_core::{Context, CoreState, EventData, SetupError};
use ha_event_bus::ListenerHandle;
use ha_helpers::{at_started, call_later, CancelHandle, HomeAssistant};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState};
use crate::integration::{IntegrationRegistry, RuntimeData};
use crate::state_machine::{retry_delay, InvalidTransition};

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Cannot unload entry in state {0}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(#[from] SetupError),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Fired on the bus whenever an entry changes lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntryStateChanged {
    pub entry_id: String,
    pub domain: String,
    pub state: ConfigEntryState,
    pub reason: Option<String>,
}

impl EventData for ConfigEntryStateChanged {
    fn event_type() -> &'static str {
        "config_entry_state_changed"
    }
}

/// A setup attempt waiting to run
enum PendingRetry {
    /// Backoff timer while the platform is running
    Timer(CancelHandle),
    /// Waiting for `homeassistant_started`
    AtStarted(ListenerHandle),
}

impl PendingRetry {
    fn cancel(&self) {
        match self {
            PendingRetry::Timer(handle) => handle.cancel(),
            PendingRetry::AtStarted(handle) => handle.cancel(),
        }
    }
}

/// Config Entries Manager
///
/// Owns every config entry, drives setup and unload through the
/// integration registered for the entry's domain and keeps the runtime data
/// each loaded entry produced.
pub struct ConfigEntries {
    hass: HomeAssistant,

    integrations: Arc<IntegrationRegistry>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Runtime data of loaded entries
    runtime_data: DashMap<String, RuntimeData>,

    /// Scheduled setup retries by entry_id
    pending_retries: DashMap<String, PendingRetry>,
}

impl ConfigEntries {
    /// Create a new config entries manager
    pub fn new(hass: HomeAssistant, integrations: Arc<IntegrationRegistry>) -> Arc<Self> {
        Arc::new(Self {
            hass,
            integrations,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            runtime_data: DashMap::new(),
            pending_retries: DashMap::new(),
        })
    }

    /// Index an entry
    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    /// Remove an entry from indexes
    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        self.by_domain.remove_if(&entry.domain, |_, ids| ids.is_empty());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    fn entry(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get loaded entries for a domain
    pub fn get_loaded_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.get_by_domain(domain)
            .into_iter()
            .filter(|e| e.is_loaded())
            .collect()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Runtime data the integration returned from setup
    ///
    /// `None` when the entry is not loaded or holds a different type.
    pub fn runtime_data<T: Any + Send + Sync>(&self, entry_id: &str) -> Option<Arc<T>> {
        let data = self.runtime_data.get(entry_id)?.value().clone();
        data.downcast::<T>().ok()
    }

    /// Add a new config entry
    pub fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Unload and forget an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self.entry(entry_id)?;

        if let Err(err) = self.unload(entry_id).await {
            warn!("Removing entry {} that did not unload cleanly: {}", entry_id, err);
        }
        self.cancel_retry(entry_id);
        self.runtime_data.remove(entry_id);
        self.unindex_entry(&entry);

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Move an entry to `state` and announce it on the bus
    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let domain = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            entry.try_set_state(state, reason.clone())?;
            entry.domain.clone()
        };

        debug!("Entry {} state changed to {}", entry_id, state);
        self.hass.bus().fire_typed(
            ConfigEntryStateChanged {
                entry_id: entry_id.to_string(),
                domain,
                state,
                reason,
            },
            Context::new(),
        );
        Ok(())
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, pending)) = self.pending_retries.remove(entry_id) {
            pending.cancel();
        }
    }

    /// Set up an entry through its integration
    ///
    /// Disabled and already loaded entries are left alone. An integration
    /// that is not ready yet puts the entry in `SetupRetry` and a new attempt
    /// is scheduled; the error is still returned to the caller.
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.entry(entry_id)?.setup_lock.clone();
        let _guard = lock.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self.entry(entry_id)?;

        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }
        if entry.is_loaded() {
            debug!("Entry {} is already loaded", entry_id);
            return Ok(());
        }

        self.cancel_retry(entry_id);
        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(integration) = self.integrations.get(&entry.domain) else {
            error!(
                "Setup failed for entry {} ({}): integration not found",
                entry.title, entry.domain
            );
            self.set_state(
                entry_id,
                ConfigEntryState::SetupError,
                Some(format!("Integration {} not found", entry.domain)),
            )?;
            return Err(ConfigEntriesError::IntegrationNotFound(entry.domain));
        };

        let entry = self.entry(entry_id)?;
        match integration.setup_entry(&self.hass, &entry).await {
            Ok(runtime_data) => {
                self.runtime_data.insert(entry_id.to_string(), runtime_data);
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                let delay = retry_delay(entry.tries);
                if let Some(mut stored) = self.entries.get_mut(entry_id) {
                    stored.increment_tries();
                }
                self.set_state(
                    entry_id,
                    ConfigEntryState::SetupRetry,
                    Some(reason.clone()),
                )?;
                warn!(
                    "Config entry '{}' for {} integration not ready yet: {}; retrying in {:?}",
                    entry.title, entry.domain, reason, delay
                );
                self.schedule_retry(entry_id, delay);
                Err(SetupError::NotReady(reason).into())
            }
            Err(err) => {
                error!(
                    "Setup failed for entry {} ({}): {}",
                    entry.title, entry.domain, err
                );
                self.set_state(
                    entry_id,
                    ConfigEntryState::SetupError,
                    Some(err.reason().to_string()),
                )?;
                Err(err.into())
            }
        }
    }

    /// Queue another setup attempt
    ///
    /// Before the platform is running the attempt waits for
    /// `homeassistant_started` instead of the backoff timer.
    fn schedule_retry(self: &Arc<Self>, entry_id: &str, delay: Duration) {
        let manager = Arc::downgrade(self);
        let id = entry_id.to_string();
        let retry = move || async move {
            if let Some(manager) = manager.upgrade() {
                manager.retry_setup(&id).await;
            }
        };

        let pending = if self.hass.state() == CoreState::Running {
            PendingRetry::Timer(call_later(delay, retry))
        } else {
            PendingRetry::AtStarted(at_started(&self.hass, move |_hass| retry()))
        };
        self.pending_retries.insert(entry_id.to_string(), pending);
    }

    async fn retry_setup(self: &Arc<Self>, entry_id: &str) {
        let Some(entry) = self.get(entry_id) else {
            return;
        };
        let _guard = entry.setup_lock.lock().await;

        // An unload or manual setup may have won the lock
        let state = self.get(entry_id).map(|e| e.state);
        if state != Some(ConfigEntryState::SetupRetry) {
            debug!("Dropping stale setup retry for entry {}", entry_id);
            return;
        }

        debug!("Retrying setup of entry {}", entry_id);
        if let Err(err) = self.setup_locked(entry_id).await {
            debug!("Setup retry of entry {} failed: {}", entry_id, err);
        }
    }

    /// Unload an entry
    ///
    /// A pending retry is cancelled. Only a loaded entry reaches the
    /// integration's `unload_entry`.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.entry(entry_id)?.setup_lock.clone();
        let _guard = lock.lock().await;
        self.unload_locked(entry_id).await
    }

    async fn unload_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self.entry(entry_id)?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(()),
            ConfigEntryState::Loaded => {}
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupError => {
                self.cancel_retry(entry_id);
                self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;
                self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                return Ok(());
            }
            state => return Err(ConfigEntriesError::CannotUnload(state)),
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let runtime_data = self.runtime_data.remove(entry_id).map(|(_, data)| data);
        let result = match (self.integrations.get(&entry.domain), runtime_data) {
            (Some(integration), Some(data)) => {
                integration.unload_entry(&self.hass, &entry, data).await
            }
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(reason) => {
                error!("Unload failed for entry {}: {}", entry_id, reason);
                self.set_state(
                    entry_id,
                    ConfigEntryState::FailedUnload,
                    Some(reason.clone()),
                )?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    /// Reload an entry (unload + setup) without letting anything in between
    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.entry(entry_id)?.setup_lock.clone();
        let _guard = lock.lock().await;
        self.unload_locked(entry_id).await?;
        self.setup_locked(entry_id).await
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get all domains with entries
    pub fn domains(&self) -> Vec<String> {
        self.by_domain.iter().map(|r| r.key().clone()).collect()
    }

    /// Get count of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    /// Set up all entries concurrently
    pub async fn setup_all(self: &Arc<Self>) -> Vec<ConfigEntriesResult<()>> {
        let entry_ids = self.entry_ids();
        join_all(entry_ids.iter().map(|entry_id| self.setup(entry_id))).await
    }

    /// Unload every entry that is not already unloaded
    pub async fn unload_all(&self) -> Vec<ConfigEntriesResult<()>> {
        let entry_ids: Vec<_> = self
            .iter()
            .filter(|e| e.state != ConfigEntryState::NotLoaded)
            .map(|e| e.entry_id)
            .collect();
        join_all(entry_ids.iter().map(|entry_id| self.unload(entry_id))).await
    }
}

impl std::fmt::Debug for ConfigEntries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigEntries")
            .field("entries", &self.entries.len())
            .field("pending_retries", &self.pending_retries.len())
            .finish()
    }
}
