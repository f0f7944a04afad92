//! Fork-aware chain parameters.

use crate::{L2BlockRef, RollupConfig};

/// Maximum sequencer drift from Fjord onwards, in seconds.
pub const MAX_SEQUENCER_DRIFT_FJORD: u64 = 1800;

/// Protocol upgrades, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum Fork {
    /// Initial protocol.
    #[display("bedrock")]
    Bedrock,
    /// Regolith.
    #[display("regolith")]
    Regolith,
    /// Canyon.
    #[display("canyon")]
    Canyon,
    /// Delta.
    #[display("delta")]
    Delta,
    /// Ecotone.
    #[display("ecotone")]
    Ecotone,
    /// Fjord.
    #[display("fjord")]
    Fjord,
    /// Granite.
    #[display("granite")]
    Granite,
    /// Holocene.
    #[display("holocene")]
    Holocene,
    /// Isthmus.
    #[display("isthmus")]
    Isthmus,
}

impl Fork {
    /// All forks in activation order.
    pub const ALL: [Self; 9] = [
        Self::Bedrock,
        Self::Regolith,
        Self::Canyon,
        Self::Delta,
        Self::Ecotone,
        Self::Fjord,
        Self::Granite,
        Self::Holocene,
        Self::Isthmus,
    ];
}

/// Wraps a [`RollupConfig`] and tracks the latest fork seen on the chain.
#[derive(Debug, Clone)]
pub struct ChainSpec {
    config: RollupConfig,
    current_fork: Fork,
}

impl ChainSpec {
    /// Creates a new [`ChainSpec`].
    pub const fn new(config: RollupConfig) -> Self {
        Self { config, current_fork: Fork::Bedrock }
    }

    /// The underlying rollup configuration.
    pub const fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// The latest fork observed through [`Self::check_fork_activation`].
    pub const fn current_fork(&self) -> Fork {
        self.current_fork
    }

    /// Maximum sequencer drift at `timestamp`.
    pub fn max_sequencer_drift(&self, timestamp: u64) -> u64 {
        if self.config.is_active(Fork::Fjord, timestamp) {
            MAX_SEQUENCER_DRIFT_FJORD
        } else {
            self.config.max_sequencer_drift
        }
    }

    /// Records the fork active at `block` and logs when a new one is reached.
    pub fn check_fork_activation(&mut self, block: &L2BlockRef) {
        let fork = self.config.fork_at(block.time);
        if fork > self.current_fork {
            info!(
                target: "chain_spec",
                fork = %fork,
                block = %block,
                timestamp = block.time,
                "Detected hardfork activation"
            );
            self.current_fork = fork;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HardForkConfig;

    fn spec() -> ChainSpec {
        ChainSpec::new(RollupConfig {
            block_time: 2,
            max_sequencer_drift: 600,
            hardforks: HardForkConfig {
                ecotone_time: Some(10),
                fjord_time: Some(20),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn drift_is_fixed_after_fjord() {
        let spec = spec();
        assert_eq!(spec.max_sequencer_drift(18), 600);
        assert_eq!(spec.max_sequencer_drift(20), MAX_SEQUENCER_DRIFT_FJORD);
    }

    #[test]
    fn tracks_fork_progression() {
        let mut spec = spec();
        spec.check_fork_activation(&L2BlockRef { time: 12, ..Default::default() });
        assert_eq!(spec.current_fork(), Fork::Ecotone);
        spec.check_fork_activation(&L2BlockRef { time: 4, ..Default::default() });
        assert_eq!(spec.current_fork(), Fork::Ecotone);
        spec.check_fork_activation(&L2BlockRef { time: 22, ..Default::default() });
        assert_eq!(spec.current_fork(), Fork::Fjord);
    }
}
