//! Logging for cihealth
//!
//! Every run logs to a daily-rotated file under the XDG state directory
//! (`~/.local/state/cihealth/cihealth.log.<date>`). Warnings and errors are
//! also mirrored to stderr so an operator running the CLI sees why a run was
//! aborted without opening the log file.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the background log writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    log_dir: PathBuf,
}

impl LoggingGuard {
    /// Directory the rotated log files are written to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured file level. A level directive that
/// does not parse is a configuration error rather than a silent fallback.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let file_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.trim().is_empty() => parse_filter("RUST_LOG", &directive)?,
        _ => parse_filter("logging.level", &config.level)?,
    };
    let stderr_filter = parse_filter("logging.stderr_level", &config.stderr_level)?;

    let log_path = Config::log_path();
    let log_dir = log_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::state_dir);
    let prefix = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cihealth.log".to_string());

    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Configuration(format!("cannot open log directory: {e}")))?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(file_filter);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(stderr_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| Error::Configuration(format!("logging already initialized: {e}")))?;

    tracing::debug!(log_dir = %log_dir.display(), level = %config.level, "Logging initialized");

    Ok(LoggingGuard {
        _worker: worker,
        log_dir,
    })
}

fn parse_filter(setting: &str, directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|e| {
        Error::Configuration(format!("invalid {setting} directive '{directive}': {e}"))
    })
}
