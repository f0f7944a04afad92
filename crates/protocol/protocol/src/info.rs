//! The L1-info deposit transaction that opens every L2 block.
//!
//! Ecotone calldata layout
//! +---------+--------------------------+
//! | Bytes   | Field                    |
//! +---------+--------------------------+
//! | 4       | Function signature       |
//! | 4       | BaseFeeScalar            |
//! | 4       | BlobBaseFeeScalar        |
//! | 8       | SequenceNumber           |
//! | 8       | Timestamp                |
//! | 8       | L1BlockNumber            |
//! | 32      | BaseFee                  |
//! | 32      | BlobBaseFee              |
//! | 32      | BlockHash                |
//! | 32      | BatcherHash              |
//! +---------+--------------------------+
//!
//! Isthmus appends a 4 byte operator fee scalar and an 8 byte operator fee constant. Bedrock
//! encodes every field as a full ABI word.

use crate::{BlockId, DEPOSIT_TX_TYPE, L1BlockRef};
use alloy_primitives::{Address, B256, Bytes, U256, address, keccak256};
use alloy_rlp::{Encodable, Header};

/// Account that signs L1-info deposits.
pub const L1_INFO_DEPOSITOR: Address = address!("0xDeaDDEaDDeAdDeAdDEAdDEaddeAddEAdDEAd0001");

/// The L1Block predeploy the deposit calls.
pub const L1_BLOCK_PREDEPLOY: Address = address!("0x4200000000000000000000000000000000000015");

/// Gas granted to the L1-info deposit.
pub const L1_INFO_DEPOSIT_GAS: u64 = 1_000_000;

const BEDROCK_SELECTOR: [u8; 4] = [0x01, 0x5d, 0x8e, 0xb9];
const BEDROCK_LEN: usize = 4 + 32 * 8;
const ECOTONE_SELECTOR: [u8; 4] = [0x44, 0x0a, 0x5e, 0x20];
const ECOTONE_LEN: usize = 4 + 32 * 5;
const ISTHMUS_SELECTOR: [u8; 4] = [0x09, 0x89, 0x99, 0xbe];
const ISTHMUS_LEN: usize = ECOTONE_LEN + 4 + 8;

/// Fields of the L1 origin carried by the L1-info deposit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L1BlockInfo {
    /// L1 origin number.
    pub number: u64,
    /// L1 origin timestamp.
    pub time: u64,
    /// L1 origin hash.
    pub hash: B256,
    /// Position of the L2 block within the epoch.
    pub sequence_number: u64,
    /// L1 origin base fee.
    pub base_fee: U256,
    /// Batch submitter address.
    pub batcher_address: Address,
}

/// Error raised while decoding an L1-info deposit.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum L1InfoDecodeError {
    /// The transaction is not a deposit.
    #[error("not a deposit transaction")]
    NotDeposit,
    /// The deposit envelope is malformed.
    #[error("malformed deposit: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The calldata has an unknown selector.
    #[error("unknown L1 info selector {0:?}")]
    UnknownSelector([u8; 4]),
    /// The calldata has the wrong length for its selector.
    #[error("invalid L1 info length: expected {expected}, got {got}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
}

impl L1BlockInfo {
    /// Creates the info for the `sequence_number`th L2 block on `origin`.
    pub fn from_origin(origin: &L1BlockRef, sequence_number: u64) -> Self {
        Self {
            number: origin.number,
            time: origin.time,
            hash: origin.hash,
            sequence_number,
            ..Default::default()
        }
    }

    /// The [`BlockId`] of the L1 origin.
    pub const fn id(&self) -> BlockId {
        BlockId { hash: self.hash, number: self.number }
    }

    /// Decodes an encoded deposit transaction, including its type byte.
    pub fn decode_deposit_tx(tx: &[u8]) -> Result<Self, L1InfoDecodeError> {
        let Some((&DEPOSIT_TX_TYPE, mut buf)) = tx.split_first() else {
            return Err(L1InfoDecodeError::NotDeposit);
        };
        let header = Header::decode(&mut buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString.into());
        }
        // source hash, from, to, mint, value, gas, system flag
        for _ in 0..7 {
            Header::decode_bytes(&mut buf, false)?;
        }
        let data = Header::decode_bytes(&mut buf, false)?;
        Self::decode_calldata(data)
    }

    /// Decodes the calldata of an L1-info deposit.
    pub fn decode_calldata(r: &[u8]) -> Result<Self, L1InfoDecodeError> {
        if r.len() < 4 {
            return Err(L1InfoDecodeError::InvalidLength { expected: 4, got: r.len() });
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&r[..4]);

        let expected = match selector {
            BEDROCK_SELECTOR => BEDROCK_LEN,
            ECOTONE_SELECTOR => ECOTONE_LEN,
            ISTHMUS_SELECTOR => ISTHMUS_LEN,
            other => return Err(L1InfoDecodeError::UnknownSelector(other)),
        };
        if r.len() != expected {
            return Err(L1InfoDecodeError::InvalidLength { expected, got: r.len() });
        }

        if selector == BEDROCK_SELECTOR {
            return Ok(Self {
                number: be_u64(&r[28..36]),
                time: be_u64(&r[60..68]),
                base_fee: U256::from_be_slice(&r[68..100]),
                hash: B256::from_slice(&r[100..132]),
                sequence_number: be_u64(&r[156..164]),
                batcher_address: Address::from_slice(&r[176..196]),
            });
        }

        Ok(Self {
            sequence_number: be_u64(&r[12..20]),
            time: be_u64(&r[20..28]),
            number: be_u64(&r[28..36]),
            base_fee: U256::from_be_slice(&r[36..68]),
            hash: B256::from_slice(&r[100..132]),
            batcher_address: Address::from_slice(&r[144..164]),
        })
    }

    /// Encodes the info as Ecotone calldata with zero fee scalars.
    pub fn encode_calldata(&self) -> Bytes {
        let mut buf = Vec::with_capacity(ECOTONE_LEN);
        buf.extend_from_slice(&ECOTONE_SELECTOR);
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.time.to_be_bytes());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.base_fee.to_be_bytes::<{ U256::BYTES }>());
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(self.hash.as_slice());
        buf.extend_from_slice(self.batcher_address.into_word().as_slice());
        buf.into()
    }

    /// Source hash of the deposit, binding it to the origin and sequence number.
    pub fn source_hash(&self) -> B256 {
        let mut input = [0u8; 64];
        input[..32].copy_from_slice(self.hash.as_slice());
        input[56..].copy_from_slice(&self.sequence_number.to_be_bytes());
        let deposit_id = keccak256(input);

        let mut domain = [0u8; 64];
        domain[31] = 1;
        domain[32..].copy_from_slice(deposit_id.as_slice());
        keccak256(domain)
    }

    /// Encodes the full deposit transaction, type byte included.
    pub fn to_deposit_tx(&self) -> Bytes {
        let source_hash = self.source_hash();
        let data = self.encode_calldata();
        let fields: [&dyn Encodable; 8] = [
            &source_hash,
            &L1_INFO_DEPOSITOR,
            &L1_BLOCK_PREDEPLOY,
            &U256::ZERO,
            &U256::ZERO,
            &L1_INFO_DEPOSIT_GAS,
            &false,
            &data,
        ];
        let payload_length: usize = fields.iter().map(|f| f.length()).sum();

        let mut out = Vec::with_capacity(1 + payload_length + 4);
        out.push(DEPOSIT_TX_TYPE);
        Header { list: true, payload_length }.encode(&mut out);
        for field in fields {
            field.encode(&mut out);
        }
        out.into()
    }
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}
