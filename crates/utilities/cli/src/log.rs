//! Log output configuration.

use crate::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Global verbosity of the subscriber.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing is logged.
    Off,
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational output (default).
    #[default]
    Info,
    /// Debug output.
    Debug,
    /// Everything.
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => Self::OFF,
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

/// How often file logs are rotated.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Every minute.
    Minutely,
    /// Every hour.
    Hourly,
    /// Every day.
    #[default]
    Daily,
    /// Never.
    Never,
}

/// Stdout log sink.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdoutLogConfig {
    /// Output format.
    pub format: LogFormat,
}

/// Rolling file log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// Directory the log files are written to.
    pub directory_path: PathBuf,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Rotation policy.
    #[serde(default)]
    pub rotation: LogRotation,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Global level directive, applied on top of `RUST_LOG`.
    pub global_level: LogLevel,
    /// Stdout sink, if any.
    pub stdout_logs: Option<StdoutLogConfig>,
    /// File sink, if any.
    pub file_logs: Option<FileLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global_level: LogLevel::Info,
            stdout_logs: Some(StdoutLogConfig::default()),
            file_logs: None,
        }
    }
}
