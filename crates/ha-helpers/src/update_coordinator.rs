//! Polling coordinator shared by the entities of one data source
//!
//! A [`DataUpdateCoordinator`] owns the polling loop for one external API.
//! Entities register listeners and read the latest data from the coordinator
//! instead of polling on their own.
//!
//! Guarantees:
//! - at most one fetch runs at a time; concurrent refresh requests join the
//!   fetch already in flight
//! - `data` only changes on success; a failure keeps the previous data and
//!   clears `last_update_success`
//! - listeners run once per completed refresh, after the state was updated,
//!   and a panicking listener does not stop the others
//! - notification rounds never overlap, whether they come from a fetch or
//!   from pushed data
//! - once shut down, no further fetch is started and an in-flight result is
//!   discarded

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use ha_core::events::HomeAssistantStop;
use ha_core::SetupError;
use ha_event_bus::ListenerHandle;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::hass::HomeAssistant;
use crate::scheduler::{call_later, CancelHandle};
use crate::sync::{lock, read, write};

/// Error returned by an update method
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateFailed {
    /// The source could not be reached or returned garbage
    #[error("{0}")]
    Failed(String),

    /// The source rejected our credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),
}

impl UpdateFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        UpdateFailed::Failed(reason.into())
    }
}

impl From<UpdateFailed> for SetupError {
    fn from(err: UpdateFailed) -> Self {
        match err {
            UpdateFailed::Failed(reason) => SetupError::NotReady(reason),
            UpdateFailed::AuthFailed(reason) => SetupError::AuthFailed(reason),
        }
    }
}

/// Future returned by an update method
pub type UpdateFuture<T> = Pin<Box<dyn Future<Output = Result<T, UpdateFailed>> + Send>>;

/// Update method type
pub type UpdateMethod<T> = Arc<dyn Fn() -> UpdateFuture<T> + Send + Sync>;

/// Listener callback type
pub type UpdateListener = Arc<dyn Fn() + Send + Sync>;

/// Source of coordinator ids, so a handle can tell which coordinator issued it
static NEXT_COORDINATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Result of one refresh cycle, shared by every caller that joined it
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Updated,
    Failed(UpdateFailed),
    /// The coordinator was shut down; nothing was stored or announced
    Discarded,
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Consistent view of the coordinator state
#[derive(Debug)]
pub struct CoordinatorSnapshot<T> {
    pub data: Option<Arc<T>>,
    pub last_update_success: bool,
}

impl<T> Clone for CoordinatorSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            last_update_success: self.last_update_success,
        }
    }
}

struct RefreshState<T> {
    data: Option<Arc<T>>,
    last_update_success: bool,
    last_exception: Option<UpdateFailed>,
    last_update_success_time: Option<DateTime<Utc>>,
}

/// Builder for [`DataUpdateCoordinator`]
pub struct CoordinatorBuilder {
    name: String,
    update_interval: Option<Duration>,
    polling_disabled: bool,
}

impl CoordinatorBuilder {
    /// Poll every `interval` while at least one listener is registered
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    /// Never schedule automatic refreshes, even with an interval set
    ///
    /// Mirrors the `pref_disable_polling` option of a config entry.
    pub fn polling_disabled(mut self, disabled: bool) -> Self {
        self.polling_disabled = disabled;
        self
    }

    /// Build the coordinator
    ///
    /// Must be called within a tokio runtime: the coordinator subscribes to
    /// `homeassistant_stop` to stop polling on shutdown.
    pub fn build<T, F, Fut>(
        self,
        hass: &HomeAssistant,
        update_method: F,
    ) -> DataUpdateCoordinator<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpdateFailed>> + Send + 'static,
    {
        let update_method: UpdateMethod<T> =
            Arc::new(move || -> UpdateFuture<T> { Box::pin(update_method()) });

        let inner = Arc::new(Inner {
            id: NEXT_COORDINATOR_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            hass: hass.clone(),
            update_interval: self.update_interval,
            polling_disabled: self.polling_disabled,
            update_method,
            state: RwLock::new(RefreshState {
                data: None,
                last_update_success: false,
                last_exception: None,
                last_update_success_time: None,
            }),
            listeners: Mutex::new(IndexMap::new()),
            next_listener_id: AtomicU64::new(1),
            in_flight: Mutex::new(None),
            unsub_refresh: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
            notify_round: tokio::sync::Mutex::new(()),
            unsub_stop: Mutex::new(None),
            shutdown_requested: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let unsub_stop = hass
            .bus()
            .listen_once::<HomeAssistantStop, _, _>(move |_event| async move {
                if let Some(inner) = weak.upgrade() {
                    inner.stop_refresh();
                }
            });
        *lock(&inner.unsub_stop) = Some(unsub_stop);

        debug!(name = %inner.name, interval = ?inner.update_interval, "Created update coordinator");
        DataUpdateCoordinator { inner }
    }
}

/// Polling coordinator for one data source
///
/// Cloning is cheap; clones share the same state, listeners and schedule.
pub struct DataUpdateCoordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DataUpdateCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T> {
    id: u64,
    name: String,
    hass: HomeAssistant,
    update_interval: Option<Duration>,
    polling_disabled: bool,
    update_method: UpdateMethod<T>,
    state: RwLock<RefreshState<T>>,
    listeners: Mutex<IndexMap<u64, UpdateListener>>,
    next_listener_id: AtomicU64,
    in_flight: Mutex<Option<SharedRefresh>>,
    unsub_refresh: Mutex<Option<CancelHandle>>,
    /// Bumped whenever the polling timer is armed or cancelled
    refresh_generation: AtomicU64,
    /// Held while a result is stored and listeners are notified
    notify_round: tokio::sync::Mutex<()>,
    unsub_stop: Mutex<Option<ListenerHandle>>,
    shutdown_requested: AtomicBool,
}

impl DataUpdateCoordinator<()> {
    /// Start building a coordinator named `name` (used in logs)
    pub fn builder(name: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            name: name.into(),
            update_interval: None,
            polling_disabled: false,
        }
    }
}

impl<T: Send + Sync + 'static> DataUpdateCoordinator<T> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.inner.update_interval
    }

    /// Latest successfully fetched data
    pub fn data(&self) -> Option<Arc<T>> {
        read(&self.inner.state).data.clone()
    }

    /// Whether the most recently completed fetch succeeded
    ///
    /// `false` until the first fetch succeeds.
    pub fn last_update_success(&self) -> bool {
        read(&self.inner.state).last_update_success
    }

    /// Data and success flag, read together
    pub fn snapshot(&self) -> CoordinatorSnapshot<T> {
        let state = read(&self.inner.state);
        CoordinatorSnapshot {
            data: state.data.clone(),
            last_update_success: state.last_update_success,
        }
    }

    /// Error of the most recent fetch, if it failed
    pub fn last_exception(&self) -> Option<UpdateFailed> {
        read(&self.inner.state).last_exception.clone()
    }

    /// When data was last stored successfully
    pub fn last_update_success_time(&self) -> Option<DateTime<Utc>> {
        read(&self.inner.state).last_update_success_time
    }

    /// Refresh, joining a fetch that is already in flight
    ///
    /// Returns once that fetch completed and listeners were notified. A failed
    /// fetch is not reported; check [`last_update_success`](Self::last_update_success).
    pub async fn request_refresh(&self) {
        self.inner.start_refresh().await;
    }

    /// First refresh of a config entry
    ///
    /// Same coalescing as [`request_refresh`](Self::request_refresh), but a
    /// failure is returned as a [`SetupError`] so entry setup can be retried.
    pub async fn refresh_now(&self) -> Result<(), SetupError> {
        match self.inner.start_refresh().await {
            RefreshOutcome::Updated => Ok(()),
            RefreshOutcome::Failed(err) => Err(err.into()),
            RefreshOutcome::Discarded => Err(SetupError::NotReady(format!(
                "{} coordinator is shut down",
                self.inner.name
            ))),
        }
    }

    /// Store data pushed by the source without fetching
    ///
    /// Marks the coordinator successful, restarts the polling interval from
    /// now and notifies listeners. Waits for a notification round already
    /// running to finish first.
    pub async fn set_updated_data(&self, data: T) {
        let _round = self.inner.notify_round.lock().await;
        if self.inner.shutdown_requested.load(Ordering::SeqCst) {
            debug!(name = %self.inner.name, "Ignoring pushed data after shutdown");
            return;
        }

        {
            let mut state = write(&self.inner.state);
            state.data = Some(Arc::new(data));
            state.last_update_success = true;
            state.last_exception = None;
            state.last_update_success_time = Some(Utc::now());
        }
        debug!(name = %self.inner.name, "Manually updated data");

        self.inner.schedule_refresh();
        self.inner.update_listeners();
    }

    /// Register a callback run after every completed refresh
    ///
    /// The first listener starts automatic polling.
    pub fn add_listener(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> UpdateListenerHandle {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let was_empty = {
            let mut listeners = lock(&self.inner.listeners);
            let was_empty = listeners.is_empty();
            listeners.insert(id, Arc::new(listener));
            was_empty
        };
        trace!(name = %self.inner.name, listener = id, "Added listener");

        if was_empty {
            self.inner.schedule_refresh();
        }

        let weak_inner = Arc::downgrade(&self.inner);
        let registry: Weak<dyn ListenerRegistry> = weak_inner;
        UpdateListenerHandle {
            coordinator_id: self.inner.id,
            listener_id: id,
            registry,
        }
    }

    /// Unregister a listener; does nothing if it is already gone
    ///
    /// Removing the last listener stops automatic polling.
    pub fn remove_listener(&self, handle: &UpdateListenerHandle) {
        if handle.coordinator_id != self.inner.id {
            warn!(name = %self.inner.name, "Ignoring listener handle of another coordinator");
            return;
        }
        self.inner.remove_listener(handle.listener_id);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Whether an automatic refresh is currently scheduled
    pub fn is_refresh_scheduled(&self) -> bool {
        lock(&self.inner.unsub_refresh).is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Tear the coordinator down
    ///
    /// Cancels the polling timer and the stop hook and drops every listener.
    /// A fetch in flight may finish but its result is discarded. Calling it
    /// again does nothing.
    pub fn shutdown(&self) {
        if self.inner.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.unschedule_refresh();
        if let Some(unsub) = lock(&self.inner.unsub_stop).take() {
            unsub.cancel();
        }
        lock(&self.inner.listeners).clear();

        debug!(name = %self.inner.name, "Shut down update coordinator");
    }
}

impl<T> std::fmt::Debug for DataUpdateCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUpdateCoordinator")
            .field("name", &self.inner.name)
            .field("update_interval", &self.inner.update_interval)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Inner<T> {
    /// Join the refresh in flight or start a new one
    fn start_refresh(self: &Arc<Self>) -> SharedRefresh {
        let mut in_flight = lock(&self.in_flight);
        if let Some(refresh) = in_flight.as_ref() {
            trace!(name = %self.name, "Joining refresh in flight");
            return refresh.clone();
        }

        if self.shutdown_requested.load(Ordering::SeqCst) {
            trace!(name = %self.name, "Skipping refresh after shutdown");
            return futures::future::ready(RefreshOutcome::Discarded)
                .boxed()
                .shared();
        }

        // The fetch runs on its own task so it completes even if every
        // caller stops waiting for it.
        let task = tokio::spawn(self.clone().run_refresh());
        let refresh = async move { task.await.unwrap_or(RefreshOutcome::Discarded) }
            .boxed()
            .shared();
        *in_flight = Some(refresh.clone());
        refresh
    }

    async fn run_refresh(self: Arc<Self>) -> RefreshOutcome {
        let started = Instant::now();
        let update_method = self.update_method.clone();
        let result = AssertUnwindSafe(async move { update_method().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(UpdateFailed::new(format!(
                    "unexpected error: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let round = self.notify_round.lock().await;
        let outcome = if self.shutdown_requested.load(Ordering::SeqCst) {
            debug!(name = %self.name, "Discarding fetch result after shutdown");
            RefreshOutcome::Discarded
        } else {
            let outcome = self.store_result(result);
            debug!(
                name = %self.name,
                elapsed = ?started.elapsed(),
                success = matches!(outcome, RefreshOutcome::Updated),
                "Finished fetching data"
            );
            self.update_listeners();
            self.schedule_refresh();
            outcome
        };
        drop(round);

        *lock(&self.in_flight) = None;
        outcome
    }

    fn store_result(&self, result: Result<T, UpdateFailed>) -> RefreshOutcome {
        let mut state = write(&self.state);
        match result {
            Ok(data) => {
                if state.last_exception.is_some() {
                    info!(name = %self.name, "Fetching data recovered");
                }
                state.data = Some(Arc::new(data));
                state.last_update_success = true;
                state.last_exception = None;
                state.last_update_success_time = Some(Utc::now());
                RefreshOutcome::Updated
            }
            Err(err) => {
                // Only the first failure in a row is worth an error
                if state.last_exception.is_none() {
                    error!(name = %self.name, error = %err, "Error fetching data");
                } else {
                    debug!(name = %self.name, error = %err, "Error fetching data");
                }
                state.last_update_success = false;
                state.last_exception = Some(err.clone());
                RefreshOutcome::Failed(err)
            }
        }
    }

    /// Run every registered listener once
    ///
    /// Listeners are looked up again right before each call, so one removed
    /// by an earlier listener (or by shutdown) is skipped.
    fn update_listeners(&self) {
        let ids: Vec<u64> = lock(&self.listeners).keys().copied().collect();
        for id in ids {
            let listener = lock(&self.listeners).get(&id).cloned();
            let Some(listener) = listener else {
                continue;
            };
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| listener())) {
                error!(
                    name = %self.name,
                    listener = id,
                    error = %panic_message(panic.as_ref()),
                    "Listener panicked"
                );
            }
        }
    }

    /// (Re)arm the polling timer if polling applies right now
    fn schedule_refresh(self: &Arc<Self>) {
        let mut unsub = lock(&self.unsub_refresh);
        if let Some(previous) = unsub.take() {
            previous.cancel();
        }
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(interval) = self.update_interval else {
            return;
        };
        if self.polling_disabled
            || self.shutdown_requested.load(Ordering::SeqCst)
            || self.hass.is_stopping()
            || lock(&self.listeners).is_empty()
        {
            return;
        }

        let weak = Arc::downgrade(self);
        *unsub = Some(call_later(interval, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.handle_refresh_interval(generation);
            }
        }));
    }

    /// Timer callback for the timer armed as `generation`
    ///
    /// A timer that already fired may still get here after it was cancelled
    /// or replaced; it must neither clear the newer timer nor fetch.
    fn handle_refresh_interval(self: &Arc<Self>, generation: u64) {
        {
            let mut unsub = lock(&self.unsub_refresh);
            if self.refresh_generation.load(Ordering::SeqCst) != generation {
                trace!(name = %self.name, "Ignoring superseded refresh timer");
                return;
            }
            unsub.take();
        }

        if self.polling_disabled || lock(&self.listeners).is_empty() {
            trace!(name = %self.name, "Refresh interval elapsed without listeners");
            return;
        }
        trace!(name = %self.name, "Refresh interval elapsed");
        // Nobody waits for a scheduled refresh; its task completes on its own
        drop(self.start_refresh());
    }

    fn unschedule_refresh(&self) {
        let mut unsub = lock(&self.unsub_refresh);
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(unsub) = unsub.take() {
            unsub.cancel();
        }
    }

    /// Stop polling because the platform is shutting down
    fn stop_refresh(&self) {
        debug!(name = %self.name, "Stopping refresh on shutdown");
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.unschedule_refresh();
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(unsub) = lock(&self.unsub_stop).take() {
            unsub.cancel();
        }
        if let Some(unsub) = lock(&self.unsub_refresh).take() {
            unsub.cancel();
        }
    }
}

/// Type-erased access to a coordinator's listeners
trait ListenerRegistry: Send + Sync {
    fn remove_listener(&self, listener_id: u64);
}

impl<T: Send + Sync + 'static> ListenerRegistry for Inner<T> {
    fn remove_listener(&self, listener_id: u64) {
        let now_empty = {
            let mut listeners = lock(&self.listeners);
            if listeners.shift_remove(&listener_id).is_none() {
                return;
            }
            listeners.is_empty()
        };
        trace!(name = %self.name, listener = listener_id, "Removed listener");

        if now_empty {
            // Re-check under the timer lock; a listener may have been added
            // (and polling rescheduled) since.
            let mut unsub = lock(&self.unsub_refresh);
            if lock(&self.listeners).is_empty() {
                self.refresh_generation.fetch_add(1, Ordering::SeqCst);
                if let Some(unsub) = unsub.take() {
                    unsub.cancel();
                }
            }
        }
    }
}

/// Registration returned by [`DataUpdateCoordinator::add_listener`]
///
/// Does not keep the coordinator alive. Dropping it does not unregister the
/// listener; call [`UpdateListenerHandle::remove`].
#[must_use = "the listener stays registered until the handle is removed"]
pub struct UpdateListenerHandle {
    coordinator_id: u64,
    listener_id: u64,
    registry: Weak<dyn ListenerRegistry>,
}

impl UpdateListenerHandle {
    /// Unregister the listener; safe to call more than once
    pub fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(self.listener_id);
        }
    }
}

impl std::fmt::Debug for UpdateListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateListenerHandle")
            .field("coordinator_id", &self.coordinator_id)
            .field("listener_id", &self.listener_id)
            .finish()
    }
}

/// Base for entities fed by a coordinator
///
/// Available exactly when the coordinator's last fetch succeeded. The entity
/// does not poll; [`CoordinatorEntity::update`] asks the coordinator instead.
pub struct CoordinatorEntity<T> {
    coordinator: DataUpdateCoordinator<T>,
    listener: Mutex<Option<UpdateListenerHandle>>,
}

impl<T: Send + Sync + 'static> CoordinatorEntity<T> {
    pub fn new(coordinator: DataUpdateCoordinator<T>) -> Self {
        Self {
            coordinator,
            listener: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &DataUpdateCoordinator<T> {
        &self.coordinator
    }

    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    pub fn should_poll(&self) -> bool {
        false
    }

    /// Start receiving coordinator updates
    ///
    /// `on_update` typically writes the entity state. Calling this again
    /// replaces the previous callback.
    pub fn added_to_hass(&self, on_update: impl Fn() + Send + Sync + 'static) {
        let handle = self.coordinator.add_listener(on_update);
        if let Some(previous) = lock(&self.listener).replace(handle) {
            previous.remove();
        }
    }

    /// Stop receiving coordinator updates
    pub fn will_remove_from_hass(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.remove();
        }
    }

    /// Ask the coordinator for fresh data
    pub async fn update(&self) {
        self.coordinator.request_refresh().await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
