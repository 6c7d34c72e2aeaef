//! Integrations
//!
//! An [`Integration`] knows how to set up and tear down the config entries
//! of one domain. Integrations are listed in an [`IntegrationRegistry`] when
//! the process starts; there is no runtime discovery.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_core::SetupError;
use ha_helpers::HomeAssistant;
use tracing::debug;

use crate::entry::ConfigEntry;

/// Whatever an integration keeps alive for a loaded entry
///
/// Handed back to [`Integration::unload_entry`] and reachable through
/// [`ConfigEntries::runtime_data`](crate::ConfigEntries::runtime_data).
pub type RuntimeData = Arc<dyn Any + Send + Sync>;

/// Builds an integration on first use
pub type IntegrationFactory = Arc<dyn Fn() -> Arc<dyn Integration> + Send + Sync>;

#[async_trait]
pub trait Integration: Send + Sync {
    /// Domain this integration serves
    fn domain(&self) -> &str;

    /// Set up one config entry
    ///
    /// Returning [`SetupError::NotReady`] schedules another attempt with
    /// backoff; the other variants leave the entry in `SetupError`.
    async fn setup_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> Result<RuntimeData, SetupError>;

    /// Tear down a loaded entry
    async fn unload_entry(
        &self,
        _hass: &HomeAssistant,
        _entry: &ConfigEntry,
        _runtime_data: RuntimeData,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Domain -> integration lookup
#[derive(Default)]
pub struct IntegrationRegistry {
    factories: DashMap<String, IntegrationFactory>,
    loaded: DashMap<String, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `domain`
    pub fn register<F, I>(&self, domain: impl Into<String>, factory: F)
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Integration + 'static,
    {
        let domain = domain.into();
        debug!("Registered integration: {}", domain);
        self.loaded.remove(&domain);
        self.factories.insert(
            domain,
            Arc::new(move || Arc::new(factory()) as Arc<dyn Integration>),
        );
    }

    /// Get the integration for `domain`, constructing it once
    pub fn get(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        if let Some(integration) = self.loaded.get(domain) {
            return Some(integration.clone());
        }

        let factory = self.factories.get(domain)?.clone();
        let integration = self
            .loaded
            .entry(domain.to_string())
            .or_insert_with(|| factory())
            .clone();
        Some(integration)
    }

    /// Check if a domain is registered
    pub fn contains(&self, domain: &str) -> bool {
        self.factories.contains_key(domain)
    }

    /// All registered domains
    pub fn domains(&self) -> Vec<String> {
        self.factories.iter().map(|r| r.key().clone()).collect()
    }
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}
