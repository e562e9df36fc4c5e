//! Logging initialization.
//!
//! Structured logging through `tracing`, pretty or JSON on stdout, or plain
//! lines appended to a file through a non-blocking writer.

use parking_lot::Mutex;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Flushes the file writer when dropped, so it lives as long as the process
static LOG_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(None);

/// Build the filter from a level or directive string. `RUST_LOG` wins when set.
pub fn build_filter(log_level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(log_level)?),
    }
}

/// Initialize logging on stdout.
pub fn init_telemetry(log_level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = build_filter(log_level)?;

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

/// Initialize logging into `log_file`.
pub fn init_telemetry_with_file(log_level: &str, json_format: bool, log_file: &Path) -> anyhow::Result<()> {
    let filter = build_filter(log_level)?;

    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .try_init()?;
    }

    *LOG_GUARD.lock() = Some(guard);
    Ok(())
}
