//! Log subscriber setup
//!
//! The detached daemon writes `timestamp LEVEL message` lines (or JSON) to its
//! log file. Everything else logs to stderr. `RUST_LOG` overrides the
//! configured level in both cases.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogLevel, LoggingConfig};

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Append log records to `path`
pub fn init_file(path: &Path, config: &LoggingConfig, verbose: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config.level.with_verbose(verbose)))
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

/// Log to stderr, used by foreground runs and the client commands
pub fn init_console(level: LogLevel) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}
