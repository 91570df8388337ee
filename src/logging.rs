//! Tracing setup driven by the `[logging]` configuration section.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{HostError, Result};

/// Parse log level string to tracing Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `RUST_LOG` directives plus the configured level as the default.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(parse_level(level).into())
}

/// Create (truncating) the log file and any missing parent directories.
fn open_log_file(path: &Path) -> Result<Arc<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(Arc::new(File::create(path)?))
}

/// Install the global subscriber for `config`.
///
/// Events go to stdout, and also to `config.file` when one is set. Fails
/// with [`HostError::Settings`] if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level);
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let installed = match config.file.as_deref() {
        Some(file) => {
            let log_file = open_log_file(Path::new(file))?;
            tracing_subscriber::registry()
                .with(
                    layer
                        .with_writer(std::io::stdout.and(log_file))
                        .with_ansi(false),
                )
                .with(filter)
                .try_init()
        }
        None => tracing_subscriber::registry()
            .with(layer.with_writer(std::io::stdout))
            .with(filter)
            .try_init(),
    };

    installed.map_err(|e| HostError::Settings(format!("logging already initialized: {e}")))
}
