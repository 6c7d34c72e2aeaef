//! End-to-end coordinator behaviour: polling, failures, entities, teardown

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ha_helpers::{
    at_start, CoordinatorEntity, DataUpdateCoordinator, Entity, HomeAssistant, UpdateFailed,
};
use serde_json::{json, Value};

/// Source that succeeds on the first call and fails afterwards
fn flaky_source(
    calls: Arc<AtomicUsize>,
) -> impl Fn() -> std::future::Ready<Result<Value, UpdateFailed>> + Send + Sync + 'static {
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(if call == 0 {
            Ok(json!({"temp": 10}))
        } else {
            Err(UpdateFailed::new("sensor offline"))
        })
    }
}

struct TemperatureSensor {
    base: CoordinatorEntity<Value>,
}

impl Entity for TemperatureSensor {
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
            .and_then(|data| data.get("temp").cloned())
    }
}

#[tokio::test(start_paused = true)]
async fn test_interval_failure_keeps_data_and_marks_unavailable() {
    let hass = HomeAssistant::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = DataUpdateCoordinator::builder("weather")
        .update_interval(Duration::from_secs(30))
        .build(&hass, flaky_source(calls.clone()));

    // Initial value before any entity subscribes
    coordinator.refresh_now().await.unwrap();
    assert_eq!(coordinator.data().as_deref(), Some(&json!({"temp": 10})));

    let sensor = Arc::new(TemperatureSensor {
        base: CoordinatorEntity::new(coordinator.clone()),
    });
    assert!(!sensor.should_poll());
    assert_eq!(sensor.state(), "10");

    let states = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::downgrade(&sensor);
    let log = states.clone();
    sensor.base.added_to_hass(move || {
        if let Some(sensor) = observed.upgrade() {
            log.lock().unwrap().push(sensor.state());
        }
    });

    // Second fetch is driven by the interval
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.data().as_deref(), Some(&json!({"temp": 10})));
    assert!(!coordinator.last_update_success());
    assert_eq!(states.lock().unwrap().as_slice(), ["unavailable".to_string()]);

    // Failures do not change the schedule
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(states.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unload_stops_polling_for_good() {
    let hass = HomeAssistant::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = DataUpdateCoordinator::builder("weather")
        .update_interval(Duration::from_secs(30))
        .build(&hass, flaky_source(calls.clone()));

    let entity = CoordinatorEntity::new(coordinator.clone());
    entity.added_to_hass(|| {});
    coordinator.refresh_now().await.unwrap();

    // Unload: entity goes away, coordinator is torn down
    entity.will_remove_from_hass();
    coordinator.shutdown();

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Re-adding a listener after shutdown does not resurrect polling
    let _late = coordinator.add_listener(|| {});
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!coordinator.is_refresh_scheduled());
}

#[tokio::test(start_paused = true)]
async fn test_first_refresh_deferred_until_start() {
    let hass = HomeAssistant::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = DataUpdateCoordinator::builder("weather")
        .build(&hass, flaky_source(calls.clone()));

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let deferred = coordinator.clone();
    let _handle = at_start(&hass, move |_hass| async move {
        deferred.request_refresh().await;
        let _ = done_tx.send(());
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    hass.start();
    done_rx.await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(coordinator.last_update_success());
}
