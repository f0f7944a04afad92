#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod sync_status;
pub use sync_status::SyncStatus;

mod tracker;
pub use tracker::StatusTracker;

mod l1_tracker;
pub use l1_tracker::{L1_TRACKER_CAPACITY, L1HeadBuffer, L1Tracker};

mod metrics;
pub use metrics::Metrics;
