//! Block identifiers and references.

use crate::{ExecutionPayload, Genesis, L1BlockInfo, L1InfoDecodeError, DEPOSIT_TX_TYPE};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A block hash paired with its number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockId {
    /// Block hash.
    pub hash: B256,
    /// Block number.
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
}

impl BlockId {
    /// Creates a new [`BlockId`].
    pub const fn new(hash: B256, number: u64) -> Self {
        Self { hash, number }
    }

    /// Returns `true` if this is the zero id.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// Reference to an L1 block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1BlockRef {
    /// Block hash.
    pub hash: B256,
    /// Block number.
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Block timestamp, in seconds.
    #[serde(rename = "timestamp", with = "alloy_serde::quantity")]
    pub time: u64,
}

impl L1BlockRef {
    /// Returns the [`BlockId`] of this block.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.hash, number: self.number }
    }

    /// Returns the [`BlockId`] of the parent block.
    pub const fn parent_id(&self) -> BlockId {
        BlockId { hash: self.parent_hash, number: self.number.saturating_sub(1) }
    }

    /// Returns `true` if this is the zero reference.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for L1BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// Reference to an L2 block, including the L1 origin it was built on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L2BlockRef {
    /// Block hash.
    pub hash: B256,
    /// Block number.
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Block timestamp, in seconds.
    #[serde(rename = "timestamp", with = "alloy_serde::quantity")]
    pub time: u64,
    /// The L1 block this L2 block references as its origin.
    pub l1_origin: BlockId,
    /// Position of this block within its L1 origin's epoch.
    #[serde(rename = "sequenceNumber", with = "alloy_serde::quantity")]
    pub sequence_number: u64,
}

impl L2BlockRef {
    /// Returns the [`BlockId`] of this block.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.hash, number: self.number }
    }

    /// Returns the [`BlockId`] of the parent block.
    pub const fn parent_id(&self) -> BlockId {
        BlockId { hash: self.parent_hash, number: self.number.saturating_sub(1) }
    }

    /// Returns `true` if this is the zero reference.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Builds the block reference of an execution payload.
    ///
    /// The L1 origin and sequence number are read from the L1-info deposit, which must be the
    /// first transaction. The genesis block carries no deposit and maps to the configured
    /// genesis origin instead.
    pub fn from_payload(
        payload: &ExecutionPayload,
        genesis: &Genesis,
    ) -> Result<Self, FromPayloadError> {
        let (l1_origin, sequence_number) = if payload.block_number == genesis.l2.number {
            if payload.block_hash != genesis.l2.hash {
                return Err(FromPayloadError::InvalidGenesisHash {
                    expected: genesis.l2.hash,
                    got: payload.block_hash,
                });
            }
            (genesis.l1, 0)
        } else {
            let first = payload
                .transactions
                .first()
                .ok_or(FromPayloadError::MissingL1InfoDeposit(payload.block_hash))?;
            match first.first() {
                Some(&DEPOSIT_TX_TYPE) => {}
                ty => return Err(FromPayloadError::UnexpectedTxType(ty.copied())),
            }
            let info = L1BlockInfo::decode_deposit_tx(first)?;
            (info.id(), info.sequence_number)
        };

        Ok(Self {
            hash: payload.block_hash,
            number: payload.block_number,
            parent_hash: payload.parent_hash,
            time: payload.timestamp,
            l1_origin,
            sequence_number,
        })
    }
}

impl fmt::Display for L2BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// Error raised when a payload cannot be turned into an [`L2BlockRef`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FromPayloadError {
    /// The payload at the genesis height does not carry the genesis hash.
    #[error("expected L2 genesis hash {expected}, got {got}")]
    InvalidGenesisHash {
        /// Configured genesis hash.
        expected: B256,
        /// Payload hash.
        got: B256,
    },
    /// The payload has no transactions.
    #[error("L2 block {0} is missing the L1 info deposit")]
    MissingL1InfoDeposit(B256),
    /// The first transaction is not a deposit.
    #[error("first payload transaction has unexpected type {0:?}")]
    UnexpectedTxType(Option<u8>),
    /// The L1-info deposit could not be decoded.
    #[error("failed to parse L1 info deposit: {0}")]
    L1Info(#[from] L1InfoDecodeError),
}

/// Named block tags understood by the L1 and execution clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum BlockLabel {
    /// The chain tip.
    #[display("latest")]
    Latest,
    /// The safe head.
    #[display("safe")]
    Safe,
    /// The finalized head.
    #[display("finalized")]
    Finalized,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{l1_ref, payload_with_origin};

    fn genesis() -> Genesis {
        Genesis {
            l1: BlockId::new(B256::repeat_byte(0x11), 10),
            l2: BlockId::new(B256::repeat_byte(0x22), 0),
            l2_time: 1_000,
        }
    }

    #[test]
    fn genesis_payload_uses_genesis_origin() {
        let genesis = genesis();
        let payload = ExecutionPayload {
            block_hash: genesis.l2.hash,
            block_number: 0,
            timestamp: 1_000,
            ..Default::default()
        };

        let block = L2BlockRef::from_payload(&payload, &genesis).unwrap();
        assert_eq!(block.l1_origin, genesis.l1);
        assert_eq!(block.sequence_number, 0);
    }

    #[test]
    fn genesis_hash_mismatch_is_rejected() {
        let payload = ExecutionPayload { block_number: 0, ..Default::default() };
        assert!(matches!(
            L2BlockRef::from_payload(&payload, &genesis()),
            Err(FromPayloadError::InvalidGenesisHash { .. })
        ));
    }

    #[test]
    fn origin_is_read_from_l1_info_deposit() {
        let origin = l1_ref(1_000);
        let payload = payload_with_origin(101, 1_202, &origin, 3);

        let block = L2BlockRef::from_payload(&payload, &genesis()).unwrap();
        assert_eq!(block.number, 101);
        assert_eq!(block.time, 1_202);
        assert_eq!(block.l1_origin, origin.id());
        assert_eq!(block.sequence_number, 3);
    }

    #[test]
    fn missing_deposit_is_rejected() {
        let payload = ExecutionPayload { block_number: 5, ..Default::default() };
        assert!(matches!(
            L2BlockRef::from_payload(&payload, &genesis()),
            Err(FromPayloadError::MissingL1InfoDeposit(_))
        ));
    }

    #[test]
    fn serializes_with_hex_quantities() {
        let block = L1BlockRef { number: 16, time: 255, ..Default::default() };
        let json = serde_json::to_value(block).unwrap();
        assert_eq!(json["number"], "0x10");
        assert_eq!(json["timestamp"], "0xff");
    }
}
