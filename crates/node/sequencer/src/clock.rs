//! Wall-clock source of the sequencer schedule.

use std::{fmt::Debug, time::SystemTime};

/// Source of the current time.
///
/// Block timestamps are unix seconds, so the schedule is expressed in [`SystemTime`].
pub trait Clock: Send + Sync + Debug {
    /// The current time.
    fn now(&self) -> SystemTime;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
