//! `tracing` subscriber setup.
//!
//! [`init_production`] is used by long-running `dispatch --log-to-file`
//! passes: JSON lines to a daily-rotated file under the logs directory, plus
//! a console copy on stderr. Every other subcommand calls [`init_cli`],
//! which only writes to stderr. Both take the configured default level and
//! let `RUST_LOG` override it.

use std::path::Path;

use anyhow::Context;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated JSON log; the date is appended.
pub const LOG_FILE_PREFIX: &str = "missive.log";

/// Keeps the background log writer alive.
///
/// Dropping it flushes buffered lines to the log file, so hold it until
/// the process exits.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the file + console subscriber.
///
/// The logs directory is created first, so it exists even when the
/// subscriber cannot be installed.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created or a global subscriber
/// is already installed in this process.
pub fn init_production(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, writer_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install log subscriber")?;

    debug!(logs_dir = %logs_dir.display(), "file logging enabled");
    Ok(LoggingGuard {
        _writer: writer_guard,
    })
}

/// Install the console-only subscriber.
///
/// Returns `false` when a subscriber was already installed; the existing
/// one stays in place and records the skipped install at `debug`.
pub fn init_cli(default_level: &str) -> bool {
    match tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .try_init()
    {
        Ok(()) => true,
        Err(err) => {
            debug!(error = %err, "log subscriber already installed, keeping it");
            false
        }
    }
}
