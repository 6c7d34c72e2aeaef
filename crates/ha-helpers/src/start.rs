//! Run callbacks once the platform has started

use std::future::Future;
use std::sync::{Arc, Mutex};

use ha_core::events::{HomeAssistantStart, HomeAssistantStarted};
use ha_core::{CoreState, EventData};
use ha_event_bus::ListenerHandle;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::hass::HomeAssistant;
use crate::sync::lock;

/// Run `callback` once the platform is starting
///
/// If start hooks are already running (`Starting` or `Running`) the callback
/// is spawned immediately and the returned handle does nothing. Otherwise it
/// runs once, when `homeassistant_start` fires, unless the handle is
/// cancelled first.
pub fn at_start<F, Fut>(hass: &HomeAssistant, callback: F) -> ListenerHandle
where
    F: FnOnce(HomeAssistant) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    at_core_state::<HomeAssistantStart, _, _>(hass, callback, CoreState::is_running)
}

/// Run `callback` once the platform is fully running
///
/// Same contract as [`at_start`], bound to `homeassistant_started`.
pub fn at_started<F, Fut>(hass: &HomeAssistant, callback: F) -> ListenerHandle
where
    F: FnOnce(HomeAssistant) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    at_core_state::<HomeAssistantStarted, _, _>(hass, callback, |state| {
        state == CoreState::Running
    })
}

fn at_core_state<E, F, Fut>(
    hass: &HomeAssistant,
    callback: F,
    reached: fn(CoreState) -> bool,
) -> ListenerHandle
where
    E: EventData + DeserializeOwned,
    F: FnOnce(HomeAssistant) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    // Subscribe before looking at the state so a start racing with us is
    // seen by one path or the other; the slot makes sure only one runs it.
    let slot = Arc::new(Mutex::new(Some(callback)));

    let deferred = slot.clone();
    let deferred_hass = hass.clone();
    let handle = hass.bus().listen_once::<E, _, _>(move |_event| async move {
        let callback = lock(&deferred).take();
        if let Some(callback) = callback {
            trace!(event_type = E::event_type(), "Running deferred start callback");
            callback(deferred_hass).await;
        }
    });

    if reached(hass.state()) {
        handle.cancel();
        let callback = lock(&slot).take();
        if let Some(callback) = callback {
            trace!(state = %hass.state(), "Running start callback immediately");
            tokio::spawn(callback(hass.clone()));
        }
        return ListenerHandle::noop();
    }

    handle
}
