//! Metrics for the status trackers.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge of tracked L1 block numbers, labelled by kind.
    pub const L1_REF: &str = "tiller_status_l1_ref";
    /// L1 head label.
    pub const L1_HEAD_LABEL: &str = "l1_head";
    /// L1 safe label.
    pub const L1_SAFE_LABEL: &str = "l1_safe";
    /// L1 finalized label.
    pub const L1_FINALIZED_LABEL: &str = "l1_finalized";

    /// Identifier for the histogram of observed L1 reorg depths.
    pub const L1_REORG_DEPTH: &str = "tiller_status_l1_reorg_depth";

    /// Initializes metrics for the status trackers.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`tiller_status`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_gauge!(Self::L1_REF, "Tracked L1 block numbers");
        metrics::describe_histogram!(Self::L1_REORG_DEPTH, "Depth of observed L1 reorgs");
    }

    /// Initializes metrics to `0` so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        tiller_macros::set!(gauge, Self::L1_REF, "kind", Self::L1_HEAD_LABEL, 0.0);
        tiller_macros::set!(gauge, Self::L1_REF, "kind", Self::L1_SAFE_LABEL, 0.0);
        tiller_macros::set!(gauge, Self::L1_REF, "kind", Self::L1_FINALIZED_LABEL, 0.0);
    }
}
