//! Error types for the script host.

use std::time::Duration;

use thiserror::Error;

/// Common error type for the script host.
#[derive(Error, Debug)]
pub enum HostError {
    /// A script instance was used out of order.
    ///
    /// Raised when a namespace is attached before a capability factory is
    /// configured, when executing without a namespace, or when a namespace
    /// belongs to a different execution context.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The script text could not be read.
    ///
    /// Recoverable: the namespace is untouched and can be reused.
    #[error("script source '{source_id}' unavailable: {cause}")]
    SourceUnavailable {
        source_id: String,
        #[source]
        cause: std::io::Error,
    },

    /// The engine rejected the script (syntax error or runtime fault).
    #[error("evaluation of '{source_id}' failed: {message}")]
    Evaluation { source_id: String, message: String },

    /// Evaluation ran past its wall-clock ceiling.
    #[error("evaluation of '{source_id}' exceeded {limit:?}")]
    Timeout { source_id: String, limit: Duration },

    /// Evaluation ran past its instruction ceiling.
    #[error("evaluation of '{source_id}' exceeded limit: {message}")]
    LimitExceeded { source_id: String, message: String },

    /// The engine context could not be set up.
    #[error("engine error: {0}")]
    Engine(String),

    /// Settings file could not be parsed or failed validation.
    #[error("settings error: {0}")]
    Settings(String),

    /// A table could not be exported.
    #[error("export error: {0}")]
    Export(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Whether a later call on the same instance can succeed without
    /// reconfiguring it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HostError::SourceUnavailable { .. }
                | HostError::Evaluation { .. }
                | HostError::Timeout { .. }
                | HostError::LimitExceeded { .. }
        )
    }
}

impl From<mlua::Error> for HostError {
    fn from(e: mlua::Error) -> Self {
        HostError::Engine(e.to_string())
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
