//! Core types for Home Assistant
//!
//! This crate provides the fundamental types shared by the runtime crates:
//! Event, Context, CoreState and the errors integrations report from setup.

mod context;
mod core_state;
mod event;
mod exceptions;

pub use context::Context;
pub use core_state::CoreState;
pub use event::{Event, EventData, EventType};
pub use exceptions::SetupError;

/// State shown by an entity whose data source is failing
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State shown by an entity that has no value yet
pub const STATE_UNKNOWN: &str = "unknown";

/// Lifecycle events fired by the runtime
pub mod events {
    use super::EventData;
    use serde::{Deserialize, Serialize};

    /// Event type fired when the platform starts
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Event type fired once the platform is fully running
    pub const HOMEASSISTANT_STARTED: &str = "homeassistant_started";

    /// Event type fired when shutdown begins
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Event type fired before the final write of persistent data
    pub const HOMEASSISTANT_FINAL_WRITE: &str = "homeassistant_final_write";

    /// Event type fired as the very last event
    pub const HOMEASSISTANT_CLOSE: &str = "homeassistant_close";

    macro_rules! lifecycle_event {
        ($(#[$doc:meta])* $name:ident => $event_type:expr) => {
            $(#[$doc])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
            pub struct $name {}

            impl EventData for $name {
                fn event_type() -> &'static str {
                    $event_type
                }
            }
        };
    }

    lifecycle_event!(
        /// Payload of [`HOMEASSISTANT_START`]
        HomeAssistantStart => HOMEASSISTANT_START
    );
    lifecycle_event!(
        /// Payload of [`HOMEASSISTANT_STARTED`]
        HomeAssistantStarted => HOMEASSISTANT_STARTED
    );
    lifecycle_event!(
        /// Payload of [`HOMEASSISTANT_STOP`]
        HomeAssistantStop => HOMEASSISTANT_STOP
    );
    lifecycle_event!(
        /// Payload of [`HOMEASSISTANT_FINAL_WRITE`]
        HomeAssistantFinalWrite => HOMEASSISTANT_FINAL_WRITE
    );
    lifecycle_event!(
        /// Payload of [`HOMEASSISTANT_CLOSE`]
        HomeAssistantClose => HOMEASSISTANT_CLOSE
    );
}
