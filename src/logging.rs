//! Logging setup.
//!
//! The console owns stdout, so logs go to stderr or to a file.
//!
//! # Example
//!
//! ```rust,no_run
//! use klippy_uds::logging::init_logging;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging()?;
//!
//!     tracing::info!("Console started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from `RUST_LOG`, defaulting to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging to stderr.
pub fn init_logging() -> Result<()> {
    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}

/// Initialize logging to `log_path`, truncating it.
///
/// # Example
/// ```rust,no_run
/// use klippy_uds::logging::init_file_logging;
/// init_file_logging("/tmp/klippy-console.log")?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_file_logging(log_path: impl AsRef<Path>) -> Result<()> {
    let log_path = log_path.as_ref();
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }
    let file = File::create(log_path).context("Failed to create log file")?;

    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}

/// Initialize file logging with daily rotation.
///
/// Files are written to `log_dir` as `klippy-console.log.YYYY-MM-DD`.
#[cfg(feature = "log-rotation")]
pub fn init_logging_with_rotation(log_dir: impl AsRef<Path>) -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "klippy-console.log");

    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}
