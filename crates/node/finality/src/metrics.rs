//! Metrics for the finalizer.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge of the latest finalized L1 block number.
    pub const FINALIZED_L1: &str = "tiller_finality_finalized_l1";
    /// Identifier for the gauge of the number of buffered finality entries.
    pub const FINALITY_DATA: &str = "tiller_finality_data";
    /// Identifier for the counter of L2 blocks promoted to finalized.
    pub const PROMOTIONS: &str = "tiller_finality_promotions";

    /// Initializes metrics for the finalizer.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`tiller_finality`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_gauge!(Self::FINALIZED_L1, "Latest finalized L1 block number");
        metrics::describe_gauge!(Self::FINALITY_DATA, "Safe blocks awaiting L1 finality");
        metrics::describe_counter!(Self::PROMOTIONS, "L2 blocks promoted to finalized");
    }

    /// Initializes metrics to `0` so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        tiller_macros::set!(gauge, Self::FINALIZED_L1, 0.0);
        tiller_macros::set!(gauge, Self::FINALITY_DATA, 0.0);
        metrics::counter!(Self::PROMOTIONS).absolute(0);
    }
}
