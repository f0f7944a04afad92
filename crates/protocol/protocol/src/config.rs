//! Rollup configuration.

use crate::{BlockId, Fork, L2BlockRef};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// Genesis anchors of the rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Genesis {
    /// The L1 block the rollup starts from.
    pub l1: BlockId,
    /// The first L2 block.
    pub l2: BlockId,
    /// Timestamp of the first L2 block.
    pub l2_time: u64,
}

/// Activation timestamps of the protocol upgrades. `None` means not scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HardForkConfig {
    /// Regolith activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regolith_time: Option<u64>,
    /// Canyon activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canyon_time: Option<u64>,
    /// Delta activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_time: Option<u64>,
    /// Ecotone activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecotone_time: Option<u64>,
    /// Fjord activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fjord_time: Option<u64>,
    /// Granite activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granite_time: Option<u64>,
    /// Holocene activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holocene_time: Option<u64>,
    /// Isthmus activation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isthmus_time: Option<u64>,
}

impl HardForkConfig {
    /// Activation time of `fork`. Bedrock is active from genesis.
    pub const fn activation_time(&self, fork: Fork) -> Option<u64> {
        match fork {
            Fork::Bedrock => Some(0),
            Fork::Regolith => self.regolith_time,
            Fork::Canyon => self.canyon_time,
            Fork::Delta => self.delta_time,
            Fork::Ecotone => self.ecotone_time,
            Fork::Fjord => self.fjord_time,
            Fork::Granite => self.granite_time,
            Fork::Holocene => self.holocene_time,
            Fork::Isthmus => self.isthmus_time,
        }
    }
}

/// Alt-DA challenge parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AltDaConfig {
    /// Commitment challenge window, in L1 blocks.
    pub da_challenge_window: u64,
    /// Challenge resolution window, in L1 blocks.
    pub da_resolve_window: u64,
}

/// Static parameters of a rollup chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RollupConfig {
    /// Genesis anchors.
    pub genesis: Genesis,
    /// Seconds between L2 blocks.
    pub block_time: u64,
    /// Maximum distance, in seconds, an L2 block timestamp may run ahead of its L1 origin.
    pub max_sequencer_drift: u64,
    /// Sequencing window size, in L1 blocks.
    pub seq_window_size: u64,
    /// Upgrade activation times.
    #[serde(default)]
    pub hardforks: HardForkConfig,
    /// Alt-DA parameters, if the chain uses alternative data availability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_da: Option<AltDaConfig>,
}

impl RollupConfig {
    /// Returns `true` if `fork` is active at `timestamp`.
    pub fn is_active(&self, fork: Fork, timestamp: u64) -> bool {
        self.hardforks.activation_time(fork).is_some_and(|t| timestamp >= t)
    }

    /// Returns `true` if the block at `timestamp` is the first block with `fork` active.
    ///
    /// The genesis block never counts as an activation block.
    pub fn is_activation_block(&self, fork: Fork, timestamp: u64) -> bool {
        timestamp >= self.block_time
            && self.is_active(fork, timestamp)
            && !self.is_active(fork, timestamp - self.block_time)
    }

    /// Returns `true` if alt-DA is configured.
    pub const fn alt_da_enabled(&self) -> bool {
        self.alt_da.is_some()
    }

    /// Returns the latest fork active at `timestamp`.
    pub fn fork_at(&self, timestamp: u64) -> Fork {
        Fork::ALL
            .iter()
            .rev()
            .copied()
            .find(|fork| self.is_active(*fork, timestamp))
            .unwrap_or(Fork::Bedrock)
    }

    /// The reference of the L2 genesis block.
    pub const fn genesis_l2_ref(&self) -> L2BlockRef {
        L2BlockRef {
            hash: self.genesis.l2.hash,
            number: self.genesis.l2.number,
            parent_hash: B256::ZERO,
            time: self.genesis.l2_time,
            l1_origin: self.genesis.l1,
            sequence_number: 0,
        }
    }
}
