#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod api;
pub use api::{ENGINE_CALL_TIMEOUT, EngineApi, EngineApiError, EngineSyncingError};

mod error;
pub use error::{BuildStartError, EngineControllerError, Severity};

mod sync;
pub use sync::{ElSyncState, SyncConfig, SyncMode};

mod controller;
pub use controller::{EngineController, EngineHeads};

mod clsync;
pub use clsync::{CLSync, DEFAULT_MAX_MEMORY, PayloadsQueue, QueueError, payload_mem_size};

mod metrics;
pub use metrics::Metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
