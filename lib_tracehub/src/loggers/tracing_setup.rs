//! # Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber: console output always, and
//! a non-blocking file writer when a log directory is configured. Old log
//! files of the same app are pruned before the new one is opened.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use glob::glob;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::configs::LogOptions;

/// Installs the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `options.level`. The returned
/// guard must be held for as long as file logging should keep flushing.
///
/// # Errors
/// Fails on an invalid filter directive, an unusable log directory, or when a
/// global subscriber is already installed.
pub fn init_tracing(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .with_context(|| format!("invalid log level '{}'", options.level))?;
    let console = fmt::layer().with_target(true);

    let Some(dir) = options.dir.as_deref() else {
        tracing_subscriber::registry().with(filter).with(console).try_init()?;
        return Ok(None);
    };

    fs::create_dir_all(dir).with_context(|| format!("cannot create log dir {}", dir.display()))?;
    // The file opened below counts towards `keep_files`.
    cleanup_old_logs(dir, &options.app_name, options.keep_files.saturating_sub(1))?;

    let file_name = log_file_name(&options.app_name);
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, &file_name));
    let file = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    tracing::info!(log_file = %dir.join(&file_name).display(), level = %options.level, "logging initialised");
    Ok(Some(guard))
}

fn log_file_name(app_name: &str) -> String {
    format!("{}-{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

/// Deletes all but the `keep` newest `{app_name}-*.log` files in `log_dir`.
///
/// Returns how many files were removed. Files that cannot be removed are
/// reported on stderr and skipped.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize> {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut entries: Vec<(SystemTime, PathBuf)> = glob(&pattern)
        .with_context(|| format!("bad log file pattern {}", pattern))?
        .filter_map(|res| res.ok())
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    // Newest first; names carry a timestamp, so they break ties.
    entries.sort_by_key(|(modified, path)| Reverse((*modified, path.clone())));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
