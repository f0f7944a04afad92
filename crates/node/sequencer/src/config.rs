//! Configuration of the sequencer.

use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration of the [`Sequencer`](crate::Sequencer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SequencerConfig {
    /// Whether this node sequences at all.
    pub enabled: bool,
    /// Start in the stopped state. The operator has to start the sequencer explicitly.
    pub stopped: bool,
    /// Stall sequencing while the unsafe head is this many blocks ahead of the safe head.
    /// `0` disables the check.
    pub max_safe_lag: u64,
    /// Number of L1 blocks an origin must be buried under before it is used.
    pub l1_confirmations: u64,
    /// JSON-RPC endpoint of the conductor, if sequencing is gated by leader election.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conductor_rpc_url: Option<Url>,
}

impl SequencerConfig {
    /// Returns `true` if the sequencer should be active right after start-up.
    pub const fn start_active(&self) -> bool {
        self.enabled && !self.stopped
    }

    /// Returns `true` if a conductor endpoint is configured.
    pub const fn conductor_enabled(&self) -> bool {
        self.conductor_rpc_url.is_some()
    }
}
