//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over `[logging] level`. With `[logging] file` set, events
//! are appended to that file without ANSI colours; otherwise they go to
//! stdout.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

pub fn init(logging: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(logging));

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
        }
        None => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}")),
    }
}
