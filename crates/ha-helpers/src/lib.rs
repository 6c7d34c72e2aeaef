//! Integration helpers for Home Assistant
//!
//! The pieces an integration uses between `setup_entry` and `unload_entry`:
//!
//! - [`HomeAssistant`] - runtime context with the event bus, run state and
//!   typed shared data
//! - [`DataUpdateCoordinator`] - polls one data source and fans updates out
//!   to entities
//! - [`CoordinatorEntity`] / [`Entity`] - entities backed by a coordinator
//! - [`at_start`] / [`at_started`] - defer work until the platform runs
//! - [`call_later`] - cancellable delayed callbacks

pub mod entity;
pub mod hass;
pub mod scheduler;
pub mod start;
mod sync;
pub mod update_coordinator;

pub use entity::Entity;
pub use hass::{HassData, HomeAssistant};
pub use scheduler::{call_later, CancelHandle};
pub use start::{at_start, at_started};
pub use update_coordinator::{
    CoordinatorBuilder, CoordinatorEntity, CoordinatorSnapshot, DataUpdateCoordinator,
    UpdateFailed, UpdateFuture, UpdateListenerHandle, UpdateMethod,
};
