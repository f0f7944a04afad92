//! The task that wakes the sequencer.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tiller_event::{Emitter, Event, EventError};
use tiller_sequencer::Clock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long the scheduler waits for the sequencer to re-arm after an action before it
/// fires again.
pub const SCHEDULER_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Emits [`Event::SequencerAction`] whenever the sequencer's next action is due.
///
/// The schedule is read from the sequencer's schedule watch. A change of the schedule
/// interrupts the wait, so a re-armed action is never missed.
#[derive(Debug)]
pub struct SequencerScheduler {
    schedule: watch::Receiver<Option<SystemTime>>,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn Emitter>,
    critical: watch::Receiver<Option<EventError>>,
    cancel: CancellationToken,
}

impl SequencerScheduler {
    /// Creates a scheduler that stops once `cancel` fires or a critical error is published.
    pub const fn new(
        schedule: watch::Receiver<Option<SystemTime>>,
        clock: Arc<dyn Clock>,
        emitter: Arc<dyn Emitter>,
        critical: watch::Receiver<Option<EventError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { schedule, clock, emitter, critical, cancel }
    }

    /// Runs until cancelled.
    pub async fn run(self) {
        let Self { mut schedule, clock, emitter, mut critical, cancel } = self;
        info!(target: "node", "Starting sequencer scheduler");

        loop {
            let next = *schedule.borrow_and_update();
            let wait = next.map(|at| at.duration_since(clock.now()).unwrap_or_default());
            let due = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = critical_error(&mut critical) => {
                    warn!(target: "node", "Critical error, stopping sequencer scheduler");
                    break;
                }
                changed = schedule.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    false
                }
                _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => true,
            };
            if !due {
                continue;
            }

            trace!(target: "node", "Sequencer action is due");
            emitter.emit(Event::SequencerAction).await;

            // The sequencer usually re-arms while handling the action. If it does not, fire
            // again after a pause.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = schedule.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(SCHEDULER_RETRY_INTERVAL) => {}
            }
        }
        info!(target: "node", "Sequencer scheduler stopped");
    }
}

/// Resolves once a critical error is published or the publisher is gone.
async fn critical_error(critical: &mut watch::Receiver<Option<EventError>>) {
    let _ = critical.wait_for(Option::is_some).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_event::test_utils::TestEmitter;
    use tiller_sequencer::test_utils::ManualClock;

    const NOW: u64 = 1_000;

    struct Harness {
        schedule: watch::Sender<Option<SystemTime>>,
        critical: watch::Sender<Option<EventError>>,
        emitter: TestEmitter,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn spawn(initial: Option<SystemTime>) -> Harness {
        let (schedule, schedule_rx) = watch::channel(initial);
        let (critical, critical_rx) = watch::channel(None);
        let emitter = TestEmitter::new();
        let cancel = CancellationToken::new();
        let scheduler = SequencerScheduler::new(
            schedule_rx,
            Arc::new(ManualClock::at(NOW)),
            emitter.as_emitter(),
            critical_rx,
            cancel.clone(),
        );
        let task = tokio::spawn(scheduler.run());
        Harness { schedule, critical, emitter, cancel, task }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn run_can_be_spawned() {
        let (_schedule, schedule_rx) = watch::channel(None);
        let (_critical, critical_rx) = watch::channel(None);
        let scheduler = SequencerScheduler::new(
            schedule_rx,
            Arc::new(ManualClock::at(NOW)),
            TestEmitter::new().as_emitter(),
            critical_rx,
            CancellationToken::new(),
        );
        let run = scheduler.run();
        assert_send(&run);
        drop(run);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_when_action_is_due() {
        let h = spawn(Some(at(NOW + 5)));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(h.emitter.is_empty());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.emitter.names(), vec!["sequencer-action"]);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idles_without_schedule() {
        let h = spawn(None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.emitter.is_empty());

        h.schedule.send_replace(Some(at(NOW)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.emitter.names(), vec!["sequencer-action"]);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_interrupts_wait() {
        let h = spawn(Some(at(NOW + 60)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.schedule.send_replace(Some(at(NOW + 2)));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.emitter.names(), vec!["sequencer-action"]);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_action_is_retried_at_interval() {
        let h = spawn(Some(at(NOW - 10)));
        tokio::time::sleep(SCHEDULER_RETRY_INTERVAL * 2 + Duration::from_millis(500)).await;
        assert_eq!(h.emitter.names().len(), 3);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_critical_error() {
        let h = spawn(None);
        h.critical.send_replace(Some(EventError::msg("unsafe head below finalized")));
        tokio::time::timeout(Duration::from_secs(1), h.task).await.unwrap().unwrap();
        assert!(h.emitter.is_empty());
    }
}
