//! `demo` integration
//!
//! Polls a synthetic temperature source through a [`DataUpdateCoordinator`]
//! and exposes it as a single sensor. `failure_rate` in the entry data makes
//! a share of the fetches fail so availability changes can be observed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ha_config_entries::{ConfigEntry, Integration, RuntimeData};
use ha_core::SetupError;
use ha_helpers::{CoordinatorEntity, DataUpdateCoordinator, Entity, HomeAssistant, UpdateFailed};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const DOMAIN: &str = "demo";

/// Poll interval when the entry does not set one
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// One sample from the source
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub sequence: u64,
}

struct TemperatureSource {
    failure_rate: f64,
    sequence: AtomicU64,
}

impl TemperatureSource {
    fn fetch(&self) -> Result<Reading, UpdateFailed> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(UpdateFailed::new("demo sensor did not respond"));
        }

        // Slow daily-ish swing around 20°C plus a little noise
        let swing = 5.0 * (sequence as f64 / 12.0).sin();
        let noise = rand::random::<f64>() * 0.4 - 0.2;
        Ok(Reading {
            temperature: ((20.0 + swing + noise) * 10.0).round() / 10.0,
            sequence,
        })
    }
}

/// The sensor entity for one entry
pub struct DemoSensor {
    name: String,
    unique_id: Option<String>,
    base: CoordinatorEntity<Reading>,
}

impl Entity for DemoSensor {
    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn unique_id(&self) -> Option<String> {
        self.unique_id.clone()
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn should_poll(&self) -> bool {
        self.base.should_poll()
    }

    fn native_value(&self) -> Option<Value> {
        self.base
            .coordinator()
            .data()
            .map(|reading| json!(reading.temperature))
    }
}

/// What a loaded demo entry keeps alive
pub struct DemoRuntime {
    pub coordinator: DataUpdateCoordinator<Reading>,
    pub sensor: Arc<DemoSensor>,
}

#[derive(Debug, Default)]
pub struct DemoIntegration;

#[async_trait]
impl Integration for DemoIntegration {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn setup_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> Result<RuntimeData, SetupError> {
        let failure_rate = entry
            .get("failure_rate")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let interval = entry
            .get("update_interval")
            .and_then(Value::as_u64)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_UPDATE_INTERVAL);

        let source = Arc::new(TemperatureSource {
            failure_rate,
            sequence: AtomicU64::new(0),
        });
        let coordinator = DataUpdateCoordinator::builder(format!("{} {}", DOMAIN, entry.title))
            .update_interval(interval)
            .polling_disabled(entry.pref_disable_polling)
            .build(hass, move || std::future::ready(source.fetch()));

        // Fails setup with NotReady when the source is down right now
        if let Err(err) = coordinator.refresh_now().await {
            coordinator.shutdown();
            return Err(err);
        }

        let sensor = Arc::new(DemoSensor {
            name: entry.title.clone(),
            unique_id: entry.unique_id.clone(),
            base: CoordinatorEntity::new(coordinator.clone()),
        });
        let observed = Arc::downgrade(&sensor);
        sensor.base.added_to_hass(move || {
            if let Some(sensor) = observed.upgrade() {
                info!(entity = %sensor.name, state = %sensor.state(), "Sensor updated");
            }
        });

        debug!(
            "Demo entry {} polling every {:?} (failure rate {})",
            entry.title, interval, failure_rate
        );
        Ok(Arc::new(DemoRuntime {
            coordinator,
            sensor,
        }))
    }

    async fn unload_entry(
        &self,
        _hass: &HomeAssistant,
        entry: &ConfigEntry,
        runtime_data: RuntimeData,
    ) -> Result<(), String> {
        let runtime = runtime_data
            .downcast::<DemoRuntime>()
            .map_err(|_| format!("unexpected runtime data for entry {}", entry.entry_id))?;

        runtime.sensor.base.will_remove_from_hass();
        runtime.coordinator.shutdown();
        Ok(())
    }
}
