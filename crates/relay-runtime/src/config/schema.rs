//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Update loop settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl RelayConfig {
    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.runtime.max_concurrent_updates == 0 {
            return Err(ConfigError::validation(
                "runtime.max_concurrent_updates must be at least 1",
            ));
        }
        if self.runtime.reply_chunk_size == 0 {
            return Err(ConfigError::validation(
                "runtime.reply_chunk_size must be at least 1",
            ));
        }
        if self.logging.output == LogOutput::File && self.logging.file_path.is_none() {
            return Err(ConfigError::missing_field("logging.file_path"));
        }
        Ok(())
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Update loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Updates processed at the same time.
    #[serde(default = "default_max_concurrent_updates")]
    pub max_concurrent_updates: usize,

    /// Characters per outgoing message before a reply is split.
    #[serde(default = "default_reply_chunk_size")]
    pub reply_chunk_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_updates: default_max_concurrent_updates(),
            reply_chunk_size: default_reply_chunk_size(),
        }
    }
}

fn default_max_concurrent_updates() -> usize {
    16
}

fn default_reply_chunk_size() -> usize {
    relay_core::DEFAULT_CHUNK_SIZE
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// The file at [`LoggingConfig::file_path`].
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level, used when `RUST_LOG` is not set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-target levels, e.g. `relay_framework = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RelayConfig::default();
        assert_eq!(config.runtime.max_concurrent_updates, 16);
        assert_eq!(config.runtime.reply_chunk_size, 4096);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = RelayConfig::default();
        config.runtime.reply_chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = RelayConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some(PathBuf::from("relay.log"));
        assert!(config.validate().is_ok());
    }
}
