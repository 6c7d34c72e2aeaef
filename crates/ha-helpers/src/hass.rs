//! The runtime context handed to every integration
//!
//! [`HomeAssistant`] bundles the event bus, the run state and a typed data
//! store. Integrations receive it in their setup routine instead of reaching
//! for global registries.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::events::{
    HomeAssistantClose, HomeAssistantFinalWrite, HomeAssistantStart, HomeAssistantStarted,
    HomeAssistantStop,
};
use ha_core::{Context, CoreState};
use ha_event_bus::EventBus;
use tokio::sync::watch;
use tracing::{debug, info};

/// Shared handle to the running platform
///
/// Cloning is cheap; every clone refers to the same instance.
#[derive(Clone)]
pub struct HomeAssistant {
    inner: Arc<HassInner>,
}

struct HassInner {
    bus: Arc<EventBus>,
    state: watch::Sender<CoreState>,
    data: HassData,
}

impl HomeAssistant {
    /// Create a new instance with its own event bus
    pub fn new() -> Self {
        Self::with_bus(Arc::new(EventBus::new()))
    }

    /// Create a new instance on an existing event bus
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        let (state, _) = watch::channel(CoreState::NotRunning);
        Self {
            inner: Arc::new(HassInner {
                bus,
                state,
                data: HassData::default(),
            }),
        }
    }

    /// The event bus
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Typed data shared between integrations
    pub fn data(&self) -> &HassData {
        &self.inner.data
    }

    /// Current run state
    pub fn state(&self) -> CoreState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_stopping(&self) -> bool {
        self.state().is_stopping()
    }

    /// Start the platform
    ///
    /// Fires `homeassistant_start` while `Starting`, then
    /// `homeassistant_started` once `Running`. Calling it on an instance that
    /// is not in `NotRunning` does nothing.
    pub fn start(&self) {
        if self.state() != CoreState::NotRunning {
            debug!(state = %self.state(), "Ignoring start request");
            return;
        }

        info!("Starting Home Assistant");
        let context = Context::new();

        self.set_state(CoreState::Starting);
        self.bus().fire_typed(HomeAssistantStart {}, context.clone());

        self.set_state(CoreState::Running);
        self.bus().fire_typed(HomeAssistantStarted {}, context);
    }

    /// Stop the platform
    ///
    /// Walks `Stopping → FinalWrite → Stopped`, firing the matching events.
    /// Stopping an instance that is already stopping or stopped does nothing.
    pub fn stop(&self) {
        let state = self.state();
        if state.is_stopping() || state == CoreState::Stopped {
            debug!(state = %state, "Ignoring stop request");
            return;
        }

        info!("Stopping Home Assistant");
        let context = Context::new();

        self.set_state(CoreState::Stopping);
        self.bus().fire_typed(HomeAssistantStop {}, context.clone());

        self.set_state(CoreState::FinalWrite);
        self.bus().fire_typed(HomeAssistantFinalWrite {}, context.clone());

        self.set_state(CoreState::Stopped);
        self.bus().fire_typed(HomeAssistantClose {}, context);
    }

    fn set_state(&self, state: CoreState) {
        let previous = self.inner.state.send_replace(state);
        debug!(from = %previous, to = %state, "Core state changed");
    }
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HomeAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistant")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Type-keyed storage for state shared between integrations
///
/// Holds at most one value per Rust type. Integrations define their own
/// struct for what they need to share and look it up by type.
#[derive(Default)]
pub struct HassData {
    values: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl HassData {
    /// Store a value, returning the one it replaced
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Option<Arc<T>> {
        self.values
            .insert(TypeId::of::<T>(), Arc::new(value))
            .and_then(|old| old.downcast::<T>().ok())
    }

    /// Get the stored value of type `T`
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.value().clone().downcast::<T>().ok())
    }

    /// Get the stored value of type `T`, creating it first if missing
    pub fn get_or_insert_with<T: Any + Send + Sync>(&self, init: impl FnOnce() -> T) -> Arc<T> {
        let value = self
            .values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>)
            .value()
            .clone();
        match value.downcast::<T>() {
            Ok(value) => value,
            Err(_) => unreachable!("values are keyed by their own TypeId"),
        }
    }

    /// Remove and return the stored value of type `T`
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|(_, value)| value.downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }
}
