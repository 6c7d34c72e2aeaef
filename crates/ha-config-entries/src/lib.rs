//! Config Entries
//!
//! This crate provides the configuration entry system for Home Assistant.
//! Config entries represent individual integration instances and manage
//! their lifecycle (setup, retry, unload, reload).
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`Integration`] - Sets up and tears down entries of one domain
//! - [`ConfigEntries`] - Manager for all config entries

pub mod entry;
pub mod integration;
pub mod manager;
pub mod state_machine;

// Re-export main types
pub use entry::{ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState};
pub use integration::{Integration, IntegrationFactory, IntegrationRegistry, RuntimeData};
pub use manager::{
    ConfigEntries, ConfigEntriesError, ConfigEntriesResult, ConfigEntryStateChanged,
};
pub use state_machine::{retry_delay, InvalidTransition};
