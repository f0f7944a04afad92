//! Mutable state of the sequencer.

use std::time::{Instant, SystemTime};
use tiller_protocol::{L2BlockRef, PayloadInfo};

/// A build job the engine acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct BuildJob {
    pub(super) info: PayloadInfo,
    pub(super) started: Instant,
}

/// Progress of the block currently being sequenced.
///
/// `onto` is set when the build is requested, `job` once the engine started it and `block`
/// once it is sealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct BuildingState {
    pub(super) onto: L2BlockRef,
    pub(super) job: Option<BuildJob>,
    pub(super) block: L2BlockRef,
}

impl BuildingState {
    pub(super) fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(super) fn info(&self) -> Option<PayloadInfo> {
        self.job.map(|job| job.info)
    }
}

#[derive(Debug)]
pub(super) struct SequencerState {
    pub(super) latest: BuildingState,
    /// The block sealed last.
    pub(super) latest_sealed: L2BlockRef,
    /// The unsafe head, as of the last forkchoice update.
    pub(super) latest_head: L2BlockRef,
    pub(super) next_action: SystemTime,
    pub(super) next_action_ok: bool,
}

impl SequencerState {
    pub(super) fn new(now: SystemTime) -> Self {
        Self {
            latest: BuildingState::default(),
            latest_sealed: L2BlockRef::default(),
            latest_head: L2BlockRef::default(),
            next_action: now,
            next_action_ok: false,
        }
    }

    /// When the next action is due, if one is planned.
    pub(super) fn schedule(&self) -> Option<SystemTime> {
        self.next_action_ok.then_some(self.next_action)
    }
}
