//! # Hub Settings
//!
//! Layered configuration for a trace hub process:
//!
//! ```text
//! built-in defaults  <  JSON config file  <  environment / CLI flags
//! ```
//!
//! Every field is optional at each layer; [`HubSettings::merge`] lets the
//! later layer win field by field. [`HubSettings::resolve`] validates the
//! merged result into the types the hub, the HTTP client and the logger
//! consume.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::HubConfig;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tracehub.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Trace change-notification hub", version)]
#[serde(rename_all = "camelCase")]
pub struct HubSettings {
    #[clap(long, env = "TRACEHUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TRACEHUB_SYNC_BASE_URL", help = "Base URL of the remote sync authority. Empty disables polling.")]
    pub sync_base_url: Option<String>,

    #[clap(long, env = "TRACEHUB_SYNC_AUTH_TOKEN", help = "Bearer token sent with sync requests.")]
    pub sync_auth_token: Option<String>,

    #[clap(long, env = "TRACEHUB_SYNC_TIMEOUT_MS", help = "Timeout in milliseconds for one sync call.")]
    pub sync_timeout_ms: Option<u64>,

    #[clap(long, env = "TRACEHUB_SYNC_MAX_RETRIES", help = "Transient retries inside one sync call.")]
    pub sync_max_retries: Option<u32>,

    #[clap(long, env = "TRACEHUB_POLL_INTERVAL_MS", help = "Milliseconds between two sync calls of one trace.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "TRACEHUB_DEBOUNCE_MS", help = "Quiet window in milliseconds before a change is broadcast.")]
    pub debounce_ms: Option<u64>,

    #[clap(long, env = "TRACEHUB_SUBSCRIBER_CAPACITY", help = "Queued messages per subscriber before drops start.")]
    pub subscriber_capacity: Option<usize>,

    #[clap(long, env = "TRACEHUB_SHUTDOWN_GRACE_MS", help = "Milliseconds each sync poller gets to stop on shutdown.")]
    pub shutdown_grace_ms: Option<u64>,

    #[clap(long, env = "TRACEHUB_LOG_DIR", help = "Directory for log files. Console only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TRACEHUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TRACEHUB_LOG_KEEP_FILES", help = "Number of log files kept in the log directory.")]
    pub log_keep_files: Option<usize>,
}

/// Where and how to reach the remote sync authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEndpoint {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Inputs of [`crate::loggers::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Prefix of log file names.
    pub app_name: String,
    /// Console only when `None`.
    pub dir: Option<PathBuf>,
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Log files kept by startup housekeeping.
    pub keep_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            app_name: "tracehub".to_string(),
            dir: None,
            level: "info".to_string(),
            keep_files: 5,
        }
    }
}

/// Fully validated settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub hub: HubConfig,
    /// `None` when remote polling is disabled.
    pub sync: Option<SyncEndpoint>,
    pub log: LogOptions,
}

impl HubSettings {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Self {
        let hub = HubConfig::default();
        let log = LogOptions::default();
        HubSettings {
            sync_timeout_ms: Some(hub.sync_timeout.as_millis() as u64),
            sync_max_retries: Some(0),
            poll_interval_ms: Some(hub.poll_interval.as_millis() as u64),
            debounce_ms: Some(hub.debounce_window.as_millis() as u64),
            subscriber_capacity: Some(hub.subscriber_capacity),
            shutdown_grace_ms: Some(hub.shutdown_grace.as_millis() as u64),
            log_level: Some(log.level),
            log_keep_files: Some(log.keep_files),
            ..Default::default()
        }
    }

    /// Merges two settings, where `other` overrides `self` for `Some` values.
    pub fn merge(self, other: HubSettings) -> HubSettings {
        HubSettings {
            config_path: other.config_path.or(self.config_path),
            sync_base_url: other.sync_base_url.or(self.sync_base_url),
            sync_auth_token: other.sync_auth_token.or(self.sync_auth_token),
            sync_timeout_ms: other.sync_timeout_ms.or(self.sync_timeout_ms),
            sync_max_retries: other.sync_max_retries.or(self.sync_max_retries),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            debounce_ms: other.debounce_ms.or(self.debounce_ms),
            subscriber_capacity: other.subscriber_capacity.or(self.subscriber_capacity),
            shutdown_grace_ms: other.shutdown_grace_ms.or(self.shutdown_grace_ms),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep_files: other.log_keep_files.or(self.log_keep_files),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<HubSettings, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates the merged settings. Missing fields fall back to the
    /// built-in defaults.
    pub fn resolve(self) -> Result<ResolvedSettings, ConfigError> {
        let s = HubSettings::defaults().merge(self);
        let defaults = HubConfig::default();

        let sync_timeout = positive_ms("syncTimeoutMs", s.sync_timeout_ms, defaults.sync_timeout)?;
        let poll_interval = positive_ms("pollIntervalMs", s.poll_interval_ms, defaults.poll_interval)?;
        let debounce_window = s.debounce_ms.map(Duration::from_millis).unwrap_or(defaults.debounce_window);
        let shutdown_grace = s.shutdown_grace_ms.map(Duration::from_millis).unwrap_or(defaults.shutdown_grace);

        let subscriber_capacity = s.subscriber_capacity.unwrap_or(defaults.subscriber_capacity);
        if subscriber_capacity == 0 {
            return Err(ConfigError::Invalid("subscriberCapacity must be at least 1".to_string()));
        }

        let sync = match s.sync_base_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let parsed = url::Url::parse(raw)
                    .map_err(|e| ConfigError::Invalid(format!("syncBaseUrl '{}': {}", raw, e)))?;
                if parsed.cannot_be_a_base() {
                    return Err(ConfigError::Invalid(format!("syncBaseUrl '{}' is not a base url", raw)));
                }
                Some(SyncEndpoint {
                    base_url: raw.to_string(),
                    auth_token: s.sync_auth_token.filter(|token| !token.is_empty()),
                    timeout: sync_timeout,
                    max_retries: s.sync_max_retries.unwrap_or(0),
                })
            }
        };

        let log_defaults = LogOptions::default();
        let log = LogOptions {
            app_name: log_defaults.app_name,
            dir: s.log_dir,
            level: s.log_level.unwrap_or(log_defaults.level),
            keep_files: s.log_keep_files.unwrap_or(log_defaults.keep_files),
        };

        Ok(ResolvedSettings {
            hub: HubConfig {
                debounce_window,
                subscriber_capacity,
                poll_interval,
                sync_timeout,
                shutdown_grace,
            },
            sync,
            log,
        })
    }
}

fn positive_ms(name: &str, value: Option<u64>, fallback: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Invalid(format!("{} must be greater than zero", name))),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(fallback),
    }
}

/// Loads settings from the process arguments and environment.
pub fn load_config() -> Result<ResolvedSettings, ConfigError> {
    load_config_from(std::env::args_os())
}

/// Loads settings from explicit arguments (first item is the program name).
///
/// An explicitly named config file must exist; the default one is optional.
pub fn load_config_from<I, T>(args: I) -> Result<ResolvedSettings, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // 1. CLI and env first, to learn the config file path
    let cli = HubSettings::try_parse_from(args)?;

    // 2. Config file layer
    let (config_file, explicit) = match cli.config_path.clone() {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let mut current = HubSettings::defaults();
    if explicit || config_file.exists() {
        let file_settings = HubSettings::from_json_file(&config_file)?;
        debug!(path = %config_file.display(), "config file loaded");
        current = current.merge(file_settings);
    } else {
        info!(
            path = %config_file.display(),
            "config file not found, using defaults and environment/CLI variables"
        );
    }

    // 3. CLI and env override the file
    current.merge(cli).resolve()
}

#[cfg(feature = "retrieve")]
impl SyncEndpoint {
    /// Builds the HTTP client for this endpoint.
    pub fn connect(&self) -> Result<crate::retrieve::HttpSyncClient, crate::retrieve::ApiError> {
        crate::retrieve::HttpSyncClient::new(&self.base_url, self.auth_token.clone(), self.timeout, self.max_retries)
    }
}
