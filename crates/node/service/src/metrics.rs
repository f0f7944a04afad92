//! Metrics for the control plane.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge that is `1` while the control plane runs.
    pub const CONTROL_PLANE_UP: &str = "tiller_node_control_plane_up";

    /// Identifier for the counter of critical errors that stopped the control plane.
    pub const CRITICAL_ERRORS: &str = "tiller_node_critical_errors";

    /// Initializes the metrics of this crate and of every actor crate.
    #[cfg(feature = "metrics")]
    pub fn init() {
        tiller_event::Metrics::init();
        tiller_engine::Metrics::init();
        tiller_sequencer::Metrics::init();
        tiller_finality::Metrics::init();
        tiller_status::Metrics::init();
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`tiller_node_service`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_gauge!(Self::CONTROL_PLANE_UP, "Whether the control plane is running");
        metrics::describe_counter!(
            Self::CRITICAL_ERRORS,
            "Critical errors that stopped the control plane"
        );
    }

    /// Initializes metrics to `0` so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        tiller_macros::set!(gauge, Self::CONTROL_PLANE_UP, 0.0);
        metrics::counter!(Self::CRITICAL_ERRORS).absolute(0);
    }
}
