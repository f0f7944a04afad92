//! Node configuration.

use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};
use tiller_cli::LogConfig;
use tiller_engine::{DEFAULT_MAX_MEMORY, SyncConfig};
use tiller_event::{
    DEFAULT_ACTOR_CAPACITY, DEFAULT_BURST, DEFAULT_EVENTS_PER_SECOND, EmitterOpts, ExecutorOpts,
    RegisterOpts,
};
use tiller_protocol::RollupConfig;
use tiller_sequencer::SequencerConfig;

/// How events are delivered to the actors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// One queue drained by a single driver task.
    Sync,
    /// One task and one bounded channel per actor.
    #[default]
    Parallel,
}

/// Token bucket applied to every actor's emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether emissions are rate limited at all.
    pub enabled: bool,
    /// Sustained rate, in events per second.
    pub events_per_second: u32,
    /// Bucket size.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            events_per_second: DEFAULT_EVENTS_PER_SECOND,
            burst: DEFAULT_BURST,
        }
    }
}

/// Error raised while loading a [`NodeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid TOML or does not match the schema.
    #[error("failed to parse node configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid node configuration: {0}")]
    Invalid(&'static str),
}

/// Error raised while installing logging or metrics.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
    /// The Prometheus exporter could not be started.
    #[cfg(feature = "metrics")]
    #[error(transparent)]
    Metrics(#[from] tiller_cli::MetricsError),
}

/// Everything needed to assemble a [`ControlPlane`](crate::ControlPlane).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NodeConfig {
    /// The rollup chain.
    pub rollup: RollupConfig,
    /// How the engine catches up with the chain.
    pub sync: SyncConfig,
    /// Block production.
    pub sequencer: SequencerConfig,
    /// Event delivery back-end.
    pub executor: ExecutorKind,
    /// Channel capacity per actor for the parallel executor.
    pub event_channel_capacity: usize,
    /// Emission rate limit.
    pub rate_limit: RateLimitConfig,
    /// Memory budget of the unsafe payload buffer, in bytes.
    pub clsync_max_memory: u64,
    /// Log output.
    pub log: LogConfig,
    /// Listen address of the Prometheus exporter. Only used with the `metrics` feature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rollup: RollupConfig::default(),
            sync: SyncConfig::default(),
            sequencer: SequencerConfig::default(),
            executor: ExecutorKind::default(),
            event_channel_capacity: DEFAULT_ACTOR_CAPACITY,
            rate_limit: RateLimitConfig::default(),
            clsync_max_memory: DEFAULT_MAX_MEMORY,
            log: LogConfig::default(),
            metrics_addr: None,
        }
    }
}

impl NodeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, NodeConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| NodeConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    /// Checks the values serde cannot.
    pub const fn validate(&self) -> Result<(), NodeConfigError> {
        if self.rollup.block_time == 0 {
            return Err(NodeConfigError::Invalid("rollup.block_time must be positive"));
        }
        if self.event_channel_capacity == 0 {
            return Err(NodeConfigError::Invalid("event_channel_capacity must be positive"));
        }
        if self.clsync_max_memory == 0 {
            return Err(NodeConfigError::Invalid("clsync_max_memory must be positive"));
        }
        Ok(())
    }

    /// Installs the global tracing subscriber and, with the `metrics` feature, the Prometheus
    /// exporter.
    ///
    /// Must be called once, from within a tokio runtime.
    pub fn init_observability(&self) -> Result<(), ObservabilityError> {
        self.log.init_tracing_subscriber(None)?;
        #[cfg(feature = "metrics")]
        if let Some(addr) = self.metrics_addr {
            tiller_cli::init_prometheus_server(addr)?;
            crate::Metrics::init();
            info!(target: "node", %addr, "Serving metrics");
        }
        Ok(())
    }

    /// Registration options shared by every actor.
    pub fn register_opts(&self) -> RegisterOpts {
        RegisterOpts {
            executor: ExecutorOpts { capacity: self.event_channel_capacity },
            emitter: EmitterOpts {
                limiting: self.rate_limit.enabled,
                events_per_second: self.rate_limit.events_per_second,
                burst: self.rate_limit.burst,
                on_limited: None,
            },
        }
    }
}
