//! Metrics for the engine controller and the CL-sync buffer.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge that tracks the block number of every engine head.
    pub const BLOCK_LABELS: &str = "tiller_engine_block_labels";
    /// Unsafe head label.
    pub const UNSAFE_LABEL: &str = "unsafe";
    /// Cross-unsafe head label.
    pub const CROSS_UNSAFE_LABEL: &str = "cross-unsafe";
    /// Pending-safe head label.
    pub const PENDING_SAFE_LABEL: &str = "pending-safe";
    /// Local-safe head label.
    pub const LOCAL_SAFE_LABEL: &str = "local-safe";
    /// Safe head label.
    pub const SAFE_LABEL: &str = "safe";
    /// Finalized head label.
    pub const FINALIZED_LABEL: &str = "finalized";
    /// Backup-unsafe head label.
    pub const BACKUP_UNSAFE_LABEL: &str = "backup-unsafe";

    /// Identifier for the histogram of engine call durations, labelled by method.
    pub const ENGINE_METHOD_REQUEST_DURATION: &str = "tiller_engine_method_request_duration";
    /// `engine_forkchoiceUpdated` method label.
    pub const FORKCHOICE_UPDATE_METHOD: &str = "forkchoice-update";
    /// `engine_newPayload` method label.
    pub const NEW_PAYLOAD_METHOD: &str = "new-payload";
    /// `engine_getPayload` method label.
    pub const GET_PAYLOAD_METHOD: &str = "get-payload";
    /// L2 block-by-label lookup method label.
    pub const L2_BLOCK_BY_LABEL_METHOD: &str = "l2-block-by-label";

    /// Identifier for the counter of forced engine resets.
    pub const ENGINE_RESET_COUNT: &str = "tiller_engine_reset_count";

    /// Identifier for the histogram of time spent fetching a sealed payload.
    pub const SEALING_DURATION: &str = "tiller_engine_sealing_duration";
    /// Identifier for the histogram of build time minus block time.
    pub const BUILD_DIFF_DURATION: &str = "tiller_engine_build_diff_duration";
    /// Identifier for the histogram of transactions per sealed block.
    pub const SEQUENCED_TXS: &str = "tiller_engine_sequenced_txs";

    /// Identifier for the gauge of payloads buffered by CL sync.
    pub const CLSYNC_QUEUE_LENGTH: &str = "tiller_clsync_queue_length";
    /// Identifier for the gauge of the memory cost of buffered payloads.
    pub const CLSYNC_QUEUE_MEMORY: &str = "tiller_clsync_queue_memory";
    /// Identifier for the counter of payloads accepted by CL sync.
    pub const UNSAFE_PAYLOADS_RECEIVED: &str = "tiller_clsync_payloads_received";
    /// Identifier for the counter of payloads dropped by CL sync, labelled by reason.
    pub const UNSAFE_PAYLOADS_DROPPED: &str = "tiller_clsync_payloads_dropped";

    /// Initializes metrics for the engine.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`tiller_engine`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_gauge!(Self::BLOCK_LABELS, "Block number of each engine head");
        metrics::describe_histogram!(
            Self::ENGINE_METHOD_REQUEST_DURATION,
            metrics::Unit::Seconds,
            "Duration of engine API calls"
        );
        metrics::describe_counter!(Self::ENGINE_RESET_COUNT, "Number of forced engine resets");
        metrics::describe_histogram!(
            Self::SEALING_DURATION,
            metrics::Unit::Seconds,
            "Time spent sealing a payload"
        );
        metrics::describe_histogram!(
            Self::BUILD_DIFF_DURATION,
            metrics::Unit::Seconds,
            "Block build time minus the configured block time"
        );
        metrics::describe_histogram!(Self::SEQUENCED_TXS, "Transactions per sealed block");
        metrics::describe_gauge!(Self::CLSYNC_QUEUE_LENGTH, "Payloads buffered by CL sync");
        metrics::describe_gauge!(
            Self::CLSYNC_QUEUE_MEMORY,
            metrics::Unit::Bytes,
            "Memory cost of payloads buffered by CL sync"
        );
        metrics::describe_counter!(
            Self::UNSAFE_PAYLOADS_RECEIVED,
            "Unsafe payloads accepted into the CL sync buffer"
        );
        metrics::describe_counter!(
            Self::UNSAFE_PAYLOADS_DROPPED,
            "Unsafe payloads dropped from the CL sync buffer"
        );
    }

    /// Initializes metrics to `0` so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        for label in [
            Self::UNSAFE_LABEL,
            Self::CROSS_UNSAFE_LABEL,
            Self::PENDING_SAFE_LABEL,
            Self::LOCAL_SAFE_LABEL,
            Self::SAFE_LABEL,
            Self::FINALIZED_LABEL,
            Self::BACKUP_UNSAFE_LABEL,
        ] {
            tiller_macros::set!(gauge, Self::BLOCK_LABELS, "label", label, 0.0);
        }
        metrics::counter!(Self::ENGINE_RESET_COUNT).absolute(0);
        tiller_macros::set!(gauge, Self::CLSYNC_QUEUE_LENGTH, 0.0);
        tiller_macros::set!(gauge, Self::CLSYNC_QUEUE_MEMORY, 0.0);
    }
}
