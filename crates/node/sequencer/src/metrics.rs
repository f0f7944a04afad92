//! Metrics for the sequencer.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of abandoned blocks.
    pub const SEQUENCING_ERRORS: &str = "tiller_sequencer_errors";
    /// Identifier for the counter of resets observed by the sequencer.
    pub const SEQUENCER_RESETS: &str = "tiller_sequencer_resets";
    /// Identifier for the counter of selected origins inconsistent with the unsafe head.
    pub const INCONSISTENT_L1_ORIGIN: &str = "tiller_sequencer_inconsistent_l1_origin";
    /// Identifier for the gauge that is 1 while the sequencer is active.
    pub const SEQUENCER_ACTIVE: &str = "tiller_sequencer_active";
    /// Identifier for the histogram of attributes preparation time.
    pub const ATTRIBUTES_BUILD_DURATION: &str = "tiller_sequencer_attributes_build_duration";

    /// Initializes metrics for the sequencer.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`tiller_sequencer`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_counter!(Self::SEQUENCING_ERRORS, "Blocks abandoned by the sequencer");
        metrics::describe_counter!(Self::SEQUENCER_RESETS, "Resets observed by the sequencer");
        metrics::describe_counter!(
            Self::INCONSISTENT_L1_ORIGIN,
            "Selected L1 origins inconsistent with the unsafe head"
        );
        metrics::describe_gauge!(Self::SEQUENCER_ACTIVE, "Whether the sequencer is active");
        metrics::describe_histogram!(
            Self::ATTRIBUTES_BUILD_DURATION,
            metrics::Unit::Seconds,
            "Time spent preparing payload attributes"
        );
    }

    /// Initializes metrics to `0` so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        metrics::counter!(Self::SEQUENCING_ERRORS).absolute(0);
        metrics::counter!(Self::SEQUENCER_RESETS).absolute(0);
        metrics::counter!(Self::INCONSISTENT_L1_ORIGIN).absolute(0);
        tiller_macros::set!(gauge, Self::SEQUENCER_ACTIVE, 0.0);
    }
}
