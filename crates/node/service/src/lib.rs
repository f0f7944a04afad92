#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod config;
pub use config::{ExecutorKind, NodeConfig, NodeConfigError, ObservabilityError, RateLimitConfig};

mod reset;
pub use reset::{EngineResetWalker, L2Heads, ResetDeriver, ResetWalkError, ResetWalker};

mod scheduler;
pub use scheduler::{SCHEDULER_RETRY_INTERVAL, SequencerScheduler};

mod control_plane;
pub use control_plane::{
    ConfirmedL1, ControlPlane, ControlPlaneBuilder, ControlPlaneError, NodeSequencer, TrackedL1,
};

mod metrics;
pub use metrics::Metrics;
