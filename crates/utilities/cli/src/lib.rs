#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod log;
pub use log::{FileLogConfig, LogConfig, LogLevel, LogRotation, StdoutLogConfig};

mod tracing;
pub use tracing::{LogFormat, init_test_tracing};

#[cfg(feature = "metrics")]
mod prometheus;
#[cfg(feature = "metrics")]
pub use prometheus::{MetricsError, init_prometheus_server};
