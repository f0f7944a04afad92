//! Structural checks on payloads returned by the execution engine.

use crate::{DEPOSIT_TX_TYPE, ExecutionPayload};
use alloy_primitives::B256;

/// A structural defect in a sealed payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadSanityError {
    /// The payload has no block hash.
    #[error("payload has a zero block hash")]
    ZeroBlockHash,
    /// The payload has no state root.
    #[error("payload {0} has a zero state root")]
    ZeroStateRoot(B256),
    /// The payload has no receipts root.
    #[error("payload {0} has a zero receipts root")]
    ZeroReceiptsRoot(B256),
    /// The payload has no transactions.
    #[error("payload {0} has no transactions")]
    NoTransactions(B256),
    /// The first transaction is not a deposit.
    #[error("payload {0} does not start with a deposit")]
    FirstTxNotDeposit(B256),
    /// A deposit follows a regular transaction.
    #[error("payload {hash} has a deposit at index {index} after a regular transaction")]
    DepositAfterUserTx {
        /// Payload hash.
        hash: B256,
        /// Index of the offending transaction.
        index: usize,
    },
}

/// Checks that a payload is well formed.
///
/// The block hash and both roots must be set, and the transactions must open with a contiguous
/// run of deposits.
pub fn sanity_check_payload(payload: &ExecutionPayload) -> Result<(), PayloadSanityError> {
    let hash = payload.block_hash;
    if hash.is_zero() {
        return Err(PayloadSanityError::ZeroBlockHash);
    }
    if payload.state_root.is_zero() {
        return Err(PayloadSanityError::ZeroStateRoot(hash));
    }
    if payload.receipts_root.is_zero() {
        return Err(PayloadSanityError::ZeroReceiptsRoot(hash));
    }
    let Some(first) = payload.transactions.first() else {
        return Err(PayloadSanityError::NoTransactions(hash));
    };
    if first.first() != Some(&DEPOSIT_TX_TYPE) {
        return Err(PayloadSanityError::FirstTxNotDeposit(hash));
    }

    let deposits = payload.deposit_count();
    if let Some(index) = payload.transactions[deposits..]
        .iter()
        .position(|tx| tx.first() == Some(&DEPOSIT_TX_TYPE))
    {
        return Err(PayloadSanityError::DepositAfterUserTx { hash, index: deposits + index });
    }
    Ok(())
}
