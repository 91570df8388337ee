//! Configuration module for the script host.

use serde::Deserialize;
use std::path::Path;

use crate::{HostError, Result};

/// How script text is turned into something the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Load the text chunk on every invocation. Binary chunks are refused.
    #[default]
    Interpreted,
    /// Keep the loaded chunk per script instance and reuse it while the
    /// source text is unchanged.
    Compiled,
}

/// Language compatibility level applied to every context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageVersion {
    /// Plain Lua 5.4.
    #[default]
    Lua54,
    /// Lua 5.4 plus the 5.1 globals older chart scripts rely on.
    Lua51Compat,
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Execution mode (interpreted, compiled).
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Language version (lua54, lua51_compat).
    #[serde(default)]
    pub language_version: LanguageVersion,
    /// Remove os/io/load and friends from the globals.
    #[serde(default)]
    pub restrict_stdlib: bool,
    /// Memory ceiling per context in megabytes (0 = unlimited).
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
}

fn default_max_memory_mb() -> usize {
    64
}

const BYTES_PER_MB: usize = 1024 * 1024;

impl EngineConfig {
    /// Memory ceiling in bytes, or `None` when it does not fit in `usize`.
    pub fn max_memory_bytes(&self) -> Option<usize> {
        self.max_memory_mb.checked_mul(BYTES_PER_MB)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            language_version: LanguageVersion::default(),
            restrict_stdlib: false,
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

/// Per-evaluation limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of instructions (0 = unlimited).
    #[serde(default)]
    pub max_instructions: u64,
    /// Maximum evaluation time in seconds (0 = unlimited).
    #[serde(default = "default_max_execution_secs")]
    pub max_execution_secs: u64,
}

fn default_max_execution_secs() -> u64 {
    30
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_instructions: 0,
            max_execution_secs: default_max_execution_secs(),
        }
    }
}

/// Script source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    /// Directory holding script files.
    #[serde(default = "default_scripts_path")]
    pub path: String,
}

fn default_scripts_path() -> String {
    "scripts".to_string()
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            path: default_scripts_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Console only when unset.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Limits configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Scripts configuration.
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "warning", "error"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(HostError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| HostError::Settings(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CHARTHOST_SCRIPTS_PATH`: Override the scripts directory
    /// - `CHARTHOST_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CHARTHOST_SCRIPTS_PATH") {
            if !path.is_empty() {
                self.scripts.path = path;
            }
        }
        if let Ok(level) = std::env::var("CHARTHOST_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - The memory ceiling does not fit in `usize` bytes
    /// - The scripts path is empty
    /// - The log level is not recognized
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_memory_bytes().is_none() {
            return Err(HostError::Settings(format!(
                "engine.max_memory_mb {} is too large",
                self.engine.max_memory_mb
            )));
        }
        if self.scripts.path.trim().is_empty() {
            return Err(HostError::Settings("scripts.path must not be empty".to_string()));
        }
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(HostError::Settings(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}
