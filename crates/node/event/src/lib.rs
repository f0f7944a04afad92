#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod event;
pub use event::{AnnotatedEvent, Event, EventError};

mod traits;
pub use traits::{Deriver, Emitter, Executable};

mod executor;
pub use executor::{
    DEFAULT_ACTOR_CAPACITY, Executor, ExecutorError, ExecutorHandle, ExecutorOpts,
    ParallelExecutor, SANITY_EVENT_LIMIT, SyncExecutor,
};

mod limiter;
pub use limiter::{DEFAULT_BURST, DEFAULT_EVENTS_PER_SECOND, LimitedEmitter, OnRateLimited};

mod tracer;
pub use tracer::{LogTracer, Tracer};

mod system;
pub use system::{EmitterOpts, RegisterOpts, System, SystemError};

mod metrics;
pub use metrics::Metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
