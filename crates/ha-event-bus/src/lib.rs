//! Event bus with typed pub/sub for Home Assistant
//!
//! Every topic carries one payload type implementing [`EventData`].
//! Components either hold a [`TypedEventReceiver`] and pull events, or
//! register a handler with [`EventBus::listen`] / [`EventBus::listen_once`]
//! that runs on its own task until cancelled.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Sender for subscribers of every event
    match_all_sender: broadcast::Sender<Event<serde_json::Value>>,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to raw events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to the topic of a typed payload
    pub fn subscribe_typed<T: EventData + DeserializeOwned>(&self) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<serde_json::Value>> {
        self.match_all_sender.subscribe()
    }

    /// Fire a raw event to the subscribers of its type and of all events
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // No active receivers is not an error
            let _ = sender.send(event.clone());
        }

        let _ = self.match_all_sender.send(event);
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        match serde_json::to_value(&event.data) {
            Ok(json) => self.fire(event.map(|_| json)),
            Err(err) => warn!(event_type = %event.event_type, error = %err, "Dropping unserializable event"),
        }
    }

    /// Run `handler` for every event of type `T` until the returned handle is cancelled
    ///
    /// The subscription is registered before this returns, so no event fired
    /// afterwards is missed. Handlers run one at a time, in firing order.
    pub fn listen<T, F, Fut>(&self, mut handler: F) -> ListenerHandle
    where
        T: EventData + DeserializeOwned,
        F: FnMut(Event<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe_typed::<T>();
        ListenerHandle::spawn(async move {
            while let Some(event) = rx.next().await {
                handler(event).await;
            }
        })
    }

    /// Run `handler` for the next event of type `T`, exactly once
    ///
    /// The handler runs on a detached task, so cancelling the handle after
    /// the event arrived does not interrupt it.
    pub fn listen_once<T, F, Fut>(&self, handler: F) -> ListenerHandle
    where
        T: EventData + DeserializeOwned,
        F: FnOnce(Event<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe_typed::<T>();
        ListenerHandle::spawn(async move {
            if let Some(event) = rx.next().await {
                tokio::spawn(handler(event));
            }
        })
    }

    /// Number of event types with at least one subscription channel
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next typed event
    ///
    /// Events whose payload does not deserialize into `T` are skipped.
    pub async fn recv(&mut self) -> Result<Event<T>, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match serde_json::from_value::<T>(event.data.clone()) {
                Ok(data) => return Ok(event.map(|_| data)),
                Err(err) => {
                    warn!(event_type = %event.event_type, error = %err, "Skipping malformed event")
                }
            }
        }
    }

    /// Receive the next typed event, riding over lag
    ///
    /// Returns `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Event<T>> {
        loop {
            match self.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(event_type = T::event_type(), skipped, "Listener lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Handle to a handler registered with [`EventBus::listen`] or [`EventBus::listen_once`]
///
/// Dropping the handle leaves the handler running; call [`ListenerHandle::cancel`]
/// to unsubscribe.
#[derive(Debug)]
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    fn spawn(fut: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            task: Some(tokio::spawn(fut)),
        }
    }

    /// A handle with nothing to cancel
    pub fn noop() -> Self {
        Self { task: None }
    }

    /// Stop listening; safe to call more than once
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Whether the listener has stopped (cancelled, fired once, or never started)
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}
