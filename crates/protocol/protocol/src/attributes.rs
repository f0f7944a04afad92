//! Payload attributes that reference the parent L2 block.

use crate::{DEPOSIT_TX_TYPE, L1BlockRef, L2BlockRef};
use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

/// Instructions for the execution engine to build a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributes {
    /// Timestamp of the block to build.
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    /// RANDAO value for the block.
    pub prev_randao: B256,
    /// Fee recipient.
    pub suggested_fee_recipient: Address,
    /// Parent beacon block root, present from Ecotone onwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
    /// Transactions forced into the block, deposits first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Bytes>>,
    /// When set, the engine must not pull transactions from its pool.
    #[serde(default)]
    pub no_tx_pool: bool,
    /// Gas limit of the block.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub gas_limit: Option<u64>,
}

impl PayloadAttributes {
    /// Returns `true` if every forced transaction is a deposit.
    ///
    /// Empty transaction lists count as deposit-only.
    pub fn is_deposits_only(&self) -> bool {
        self.transactions
            .iter()
            .flatten()
            .all(|tx| tx.first().is_some_and(|ty| *ty == DEPOSIT_TX_TYPE))
    }
}

/// [`PayloadAttributes`] together with the block they build on and their derivation source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributesWithParent {
    /// The payload attributes.
    pub attributes: PayloadAttributes,
    /// The block to build on.
    pub parent: L2BlockRef,
    /// The L1 block the attributes were derived from. `None` for sequencer-built blocks.
    pub derived_from: Option<L1BlockRef>,
    /// Whether these attributes close a derivation span.
    pub is_last_in_span: bool,
}

impl AttributesWithParent {
    /// Creates a new [`AttributesWithParent`].
    pub const fn new(
        attributes: PayloadAttributes,
        parent: L2BlockRef,
        derived_from: Option<L1BlockRef>,
        is_last_in_span: bool,
    ) -> Self {
        Self { attributes, parent, derived_from, is_last_in_span }
    }

    /// The number of the block these attributes build.
    pub const fn block_number(&self) -> u64 {
        self.parent.number.saturating_add(1)
    }

    /// Returns `true` if the attributes were derived from L1 rather than sequenced.
    pub const fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }

    /// Returns `true` if every forced transaction is a deposit.
    pub fn is_deposits_only(&self) -> bool {
        self.attributes.is_deposits_only()
    }
}
