//! # Configuration Modules
//!
//! Layered settings (defaults, JSON file, environment and CLI) for a trace
//! hub process.

/// Hub settings, their merge order and validation.
pub mod config_hub;

pub use config_hub::{load_config, load_config_from, ConfigError, HubSettings, LogOptions, ResolvedSettings, SyncEndpoint};
