#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod block;
pub use block::{BlockId, BlockLabel, FromPayloadError, L1BlockRef, L2BlockRef};

mod payload;
pub use payload::{DEPOSIT_TX_TYPE, ExecutionPayload, ExecutionPayloadEnvelope, PayloadInfo};

mod attributes;
pub use attributes::{AttributesWithParent, PayloadAttributes};

mod config;
pub use config::{AltDaConfig, Genesis, HardForkConfig, RollupConfig};

mod chain_spec;
pub use chain_spec::{ChainSpec, Fork, MAX_SEQUENCER_DRIFT_FJORD};

mod info;
pub use info::{
    L1_BLOCK_PREDEPLOY, L1_INFO_DEPOSIT_GAS, L1_INFO_DEPOSITOR, L1BlockInfo, L1InfoDecodeError,
};

mod sanity;
pub use sanity::{PayloadSanityError, sanity_check_payload};

mod fetcher;
pub use fetcher::{L1FetchError, L1Fetcher};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
