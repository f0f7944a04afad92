#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::FinalizerError;

mod finalizer;
pub use finalizer::{
    DEFAULT_FINALITY_LOOKBACK, FINALITY_DELAY, FINALITY_FETCH_TIMEOUT, FinalityData, Finalizer,
    finality_lookback,
};

mod alt_da;
pub use alt_da::{AltDaBackend, AltDaFinalizer, FinalizedHeadSignal};

mod metrics;
pub use metrics::Metrics;
