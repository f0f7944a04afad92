//! Execution payloads and build handles.

use crate::BlockId;
use alloy_primitives::{Address, B256, Bloom, Bytes, U256};
use alloy_rpc_types_engine::PayloadId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading type byte of a deposit transaction.
pub const DEPOSIT_TX_TYPE: u8 = 0x7E;

/// Handle of a block-building job on the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadInfo {
    /// The engine-issued payload id.
    pub id: PayloadId,
    /// Timestamp of the block being built.
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
}

impl PayloadInfo {
    /// Creates a new [`PayloadInfo`].
    pub const fn new(id: PayloadId, timestamp: u64) -> Self {
        Self { id, timestamp }
    }
}

impl fmt::Display for PayloadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.timestamp)
    }
}

/// An execution payload as exchanged with the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    /// Parent block hash.
    pub parent_hash: B256,
    /// Fee recipient.
    pub fee_recipient: Address,
    /// Post-state root.
    pub state_root: B256,
    /// Receipts root.
    pub receipts_root: B256,
    /// Logs bloom.
    pub logs_bloom: Bloom,
    /// Previous RANDAO value.
    pub prev_randao: B256,
    /// Block number.
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    /// Gas limit.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    /// Gas used.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Block timestamp.
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    /// Extra data.
    pub extra_data: Bytes,
    /// Base fee per gas.
    pub base_fee_per_gas: U256,
    /// Block hash.
    pub block_hash: B256,
    /// Opaque encoded transactions.
    pub transactions: Vec<Bytes>,
}

impl ExecutionPayload {
    /// Returns the [`BlockId`] of the payload.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.block_hash, number: self.block_number }
    }

    /// Returns the [`BlockId`] of the payload's parent.
    pub const fn parent_id(&self) -> BlockId {
        BlockId { hash: self.parent_hash, number: self.block_number.saturating_sub(1) }
    }

    /// Number of leading deposit transactions.
    pub fn deposit_count(&self) -> usize {
        self.transactions.iter().take_while(|tx| tx.first() == Some(&DEPOSIT_TX_TYPE)).count()
    }
}

/// An [`ExecutionPayload`] together with the beacon root it commits to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayloadEnvelope {
    /// The payload.
    pub execution_payload: ExecutionPayload,
    /// Parent beacon block root, present from Ecotone onwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
}

impl ExecutionPayloadEnvelope {
    /// Hash of the enclosed block.
    pub const fn block_hash(&self) -> B256 {
        self.execution_payload.block_hash
    }

    /// Number of the enclosed block.
    pub const fn block_number(&self) -> u64 {
        self.execution_payload.block_number
    }

    /// Parent hash of the enclosed block.
    pub const fn parent_hash(&self) -> B256 {
        self.execution_payload.parent_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_leading_deposits_only() {
        let payload = ExecutionPayload {
            transactions: vec![
                Bytes::from(vec![DEPOSIT_TX_TYPE, 1]),
                Bytes::from(vec![DEPOSIT_TX_TYPE, 2]),
                Bytes::from(vec![0x02, 3]),
                Bytes::from(vec![DEPOSIT_TX_TYPE, 4]),
            ],
            ..Default::default()
        };
        assert_eq!(payload.deposit_count(), 2);
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = ExecutionPayloadEnvelope {
            execution_payload: ExecutionPayload {
                block_number: 7,
                gas_limit: 30_000_000,
                transactions: vec![Bytes::from(vec![DEPOSIT_TX_TYPE])],
                ..Default::default()
            },
            parent_beacon_block_root: Some(B256::repeat_byte(0xab)),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"blockNumber\":\"0x7\""));
        assert_eq!(serde_json::from_str::<ExecutionPayloadEnvelope>(&json).unwrap(), envelope);
    }
}
