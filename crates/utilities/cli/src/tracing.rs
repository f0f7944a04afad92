//! Subscriber installation for the node's log sinks.

use crate::{LogConfig, LogRotation};
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::MakeWriter,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
};

const LOG_FILE_NAME: &str = "tiller.log";

/// Line format shared by every sink.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default multi-field lines.
    #[default]
    Full,
    /// One JSON object per event.
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// Abbreviated single lines.
    Compact,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Self::MINUTELY,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// Builds a formatting layer writing to `writer`.
fn sink<S, W>(format: LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    match format {
        LogFormat::Full => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

impl LogConfig {
    /// Installs the global tracing subscriber.
    ///
    /// `env_filter` defaults to `RUST_LOG`; the configured global level is added as a
    /// directive on top of it. Fails if a global subscriber is already set.
    pub fn init_tracing_subscriber(
        &self,
        env_filter: Option<EnvFilter>,
    ) -> Result<(), TryInitError> {
        let filter = env_filter
            .unwrap_or_else(EnvFilter::from_default_env)
            .add_directive(LevelFilter::from(self.global_level).into());

        let file = self.file_logs.as_ref().map(|cfg| {
            let appender =
                RollingFileAppender::new(cfg.rotation.into(), &cfg.directory_path, LOG_FILE_NAME);
            sink(cfg.format, appender)
        });
        let stdout = self.stdout_logs.as_ref().map(|cfg| sink(cfg.format, std::io::stdout));

        tracing_subscriber::registry().with(filter).with(file).with(stdout).try_init()
    }
}

/// Installs a stdout subscriber for tests. Repeated calls are no-ops.
pub fn init_test_tracing() {
    let _ = LogConfig::default().init_tracing_subscriber(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::minutely(LogRotation::Minutely, Rotation::MINUTELY)]
    #[case::hourly(LogRotation::Hourly, Rotation::HOURLY)]
    #[case::daily(LogRotation::Daily, Rotation::DAILY)]
    #[case::never(LogRotation::Never, Rotation::NEVER)]
    fn rotation_maps_to_appender(#[case] rotation: LogRotation, #[case] expected: Rotation) {
        assert_eq!(Rotation::from(rotation), expected);
    }
}
