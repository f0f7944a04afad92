#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod config;
pub use config::SequencerConfig;

mod clock;
pub use clock::{Clock, SystemClock};

mod error;
pub use error::SequencerError;

mod origin;
pub use origin::{ConfDepth, L1OriginSelector, OriginSelectorError, PREFETCH_TIMEOUT};

mod attributes;
pub use attributes::{
    ATTRIBUTES_TIMEOUT, AttributesBuilder, AttributesBuilderError, L1InfoAttributesBuilder,
};

mod conductor;
pub use conductor::{
    CONDUCTOR_COMMIT_TIMEOUT, ConductorClient, ConductorError, NoopConductor, SequencerConductor,
};

mod gossip;
pub use gossip::{AsyncGossiper, PayloadPublisher, PublishError, SimpleAsyncGossiper};

mod listener;
pub use listener::{ListenerError, NoopStateListener, SequencerStateListener};

mod sequencer;
pub use sequencer::{ENGINE_ERROR_BACKOFF, ENGINE_SYNCING_BACKOFF, SEALING_DURATION, Sequencer};

mod admin;
pub use admin::{DisabledSequencer, SequencerAdmin};

mod metrics;
pub use metrics::Metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
