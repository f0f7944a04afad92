//! Sync mode configuration and the execution-layer sync sub-state machine.

use alloy_rpc_types_engine::PayloadStatusEnum;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// How the node catches up with the chain tip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// The consensus layer inserts every unsafe payload.
    #[default]
    #[display("cl")]
    Cl,
    /// The execution client syncs itself from the first payload it is handed.
    #[display("el")]
    El,
}

/// Sync configuration of the engine controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// The sync mode.
    pub sync_mode: SyncMode,
    /// Whether the execution client can run its own sync past a finalized block.
    pub supports_post_finalization_el_sync: bool,
}

/// Progress of execution-layer sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ElSyncState {
    /// Consensus-layer sync. Execution-layer sync is not used.
    #[display("cl")]
    Cl,
    /// Execution-layer sync starts with the next unsafe payload.
    #[display("will-start-el")]
    WillStartEl,
    /// The execution client is syncing.
    #[display("started-el")]
    StartedEl,
    /// The execution client reached the tip. The next forkchoice update finalizes it.
    #[display("finished-el-but-not-finalized")]
    FinishedElButNotFinalized,
    /// Execution-layer sync completed.
    #[display("finished-el")]
    FinishedEl,
}

impl ElSyncState {
    /// The initial state for `config`.
    pub const fn initial(config: &SyncConfig) -> Self {
        match config.sync_mode {
            SyncMode::Cl => Self::Cl,
            SyncMode::El => Self::WillStartEl,
        }
    }

    /// Returns `true` while the execution client is syncing.
    pub const fn is_syncing(&self) -> bool {
        matches!(self, Self::WillStartEl | Self::StartedEl | Self::FinishedElButNotFinalized)
    }

    /// Accepts a new-payload status, advancing the state on the first valid payload.
    ///
    /// In execution-layer sync mode `SYNCING` and `ACCEPTED` count as success.
    pub(crate) fn check_new_payload_status(
        &mut self,
        mode: SyncMode,
        status: &PayloadStatusEnum,
    ) -> bool {
        match mode {
            SyncMode::El => {
                self.observe_valid(status);
                matches!(
                    status,
                    PayloadStatusEnum::Valid
                        | PayloadStatusEnum::Syncing
                        | PayloadStatusEnum::Accepted
                )
            }
            SyncMode::Cl => matches!(status, PayloadStatusEnum::Valid),
        }
    }

    /// Accepts a forkchoice-updated status, advancing the state on the first valid response.
    ///
    /// In execution-layer sync mode `SYNCING` counts as success.
    pub(crate) fn check_forkchoice_status(
        &mut self,
        mode: SyncMode,
        status: &PayloadStatusEnum,
    ) -> bool {
        match mode {
            SyncMode::El => {
                self.observe_valid(status);
                matches!(status, PayloadStatusEnum::Valid | PayloadStatusEnum::Syncing)
            }
            SyncMode::Cl => matches!(status, PayloadStatusEnum::Valid),
        }
    }

    fn observe_valid(&mut self, status: &PayloadStatusEnum) {
        if matches!(status, PayloadStatusEnum::Valid) && *self == Self::StartedEl {
            *self = Self::FinishedElButNotFinalized;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EL: SyncConfig =
        SyncConfig { sync_mode: SyncMode::El, supports_post_finalization_el_sync: false };

    #[test]
    fn initial_state_follows_mode() {
        assert_eq!(ElSyncState::initial(&SyncConfig::default()), ElSyncState::Cl);
        assert_eq!(ElSyncState::initial(&EL), ElSyncState::WillStartEl);
        assert!(ElSyncState::WillStartEl.is_syncing());
        assert!(!ElSyncState::FinishedEl.is_syncing());
        assert!(!ElSyncState::Cl.is_syncing());
    }

    #[rstest]
    #[case(SyncMode::Cl, PayloadStatusEnum::Valid, true)]
    #[case(SyncMode::Cl, PayloadStatusEnum::Syncing, false)]
    #[case(SyncMode::Cl, PayloadStatusEnum::Accepted, false)]
    #[case(SyncMode::El, PayloadStatusEnum::Syncing, true)]
    #[case(SyncMode::El, PayloadStatusEnum::Accepted, true)]
    #[case(SyncMode::El, PayloadStatusEnum::Invalid { validation_error: "bad".into() }, false)]
    fn new_payload_acceptance(
        #[case] mode: SyncMode,
        #[case] status: PayloadStatusEnum,
        #[case] accepted: bool,
    ) {
        let mut state = ElSyncState::Cl;
        assert_eq!(state.check_new_payload_status(mode, &status), accepted);
    }

    #[test]
    fn forkchoice_rejects_accepted() {
        let mut state = ElSyncState::StartedEl;
        assert!(!state.check_forkchoice_status(SyncMode::El, &PayloadStatusEnum::Accepted));
        assert_eq!(state, ElSyncState::StartedEl);
    }

    #[test]
    fn first_valid_status_finishes_el_sync() {
        let mut state = ElSyncState::StartedEl;
        assert!(state.check_new_payload_status(SyncMode::El, &PayloadStatusEnum::Syncing));
        assert_eq!(state, ElSyncState::StartedEl);
        assert!(state.check_new_payload_status(SyncMode::El, &PayloadStatusEnum::Valid));
        assert_eq!(state, ElSyncState::FinishedElButNotFinalized);
    }

    #[test]
    fn parses_sync_config() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"sync_mode":"el","supports_post_finalization_el_sync":true}"#)
                .unwrap();
        assert_eq!(config.sync_mode, SyncMode::El);
        assert!(config.supports_post_finalization_el_sync);
    }
}
