//! Metrics for the event system.

/// Container for metrics.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of emitted events, labelled by event name.
    pub const EVENTS_EMITTED: &str = "tiller_event_emitted";

    /// Identifier for the counter of events that had an effect, labelled by deriver and event.
    pub const EVENTS_HANDLED: &str = "tiller_event_handled";

    /// Identifier for the counter of emissions delayed by rate limiting, labelled by emitter.
    pub const RATE_LIMITED: &str = "tiller_event_rate_limited";

    /// Identifier for the counter of events dropped because the executor refused them.
    pub const ENQUEUE_FAILURES: &str = "tiller_event_enqueue_failures";

    /// Initializes metrics for the event system.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in [`tiller_event`][crate].
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_counter!(Self::EVENTS_EMITTED, "Number of events emitted");
        metrics::describe_counter!(Self::EVENTS_HANDLED, "Number of events handled with effect");
        metrics::describe_counter!(Self::RATE_LIMITED, "Number of rate limited emissions");
        metrics::describe_counter!(Self::ENQUEUE_FAILURES, "Number of events the executor refused");
    }

    /// Initializes metrics to `0` so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        metrics::counter!(Self::ENQUEUE_FAILURES).absolute(0);
    }
}
