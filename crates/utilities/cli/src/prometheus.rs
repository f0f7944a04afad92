//! Prometheus exporter bootstrap.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Error raised while installing the metrics exporter.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built or installed.
    #[error("failed to install prometheus exporter: {0}")]
    Build(#[from] BuildError),
}

/// Installs the global Prometheus recorder and serves it over HTTP at `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_prometheus_server(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}
