use crate::progress::ProgressState;
use arena_common::PlatformId;
use arena_kernel::ProviderError;
use arena_persist::SnapshotError;

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("player {player} is in {actual}, transition needs {expected}")]
    StateViolation {
        player: PlatformId,
        expected: ProgressState,
        actual: ProgressState,
    },
    #[error("unknown arena zone '{0}'")]
    UnknownZone(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("{operation} failed for player {player}: {source}")]
    Host {
        player: PlatformId,
        operation: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl TransitionError {
    pub fn is_state_violation(&self) -> bool {
        matches!(self, Self::StateViolation { .. })
    }
}

/// Adapter for `map_err` on host calls.
pub(crate) fn host(
    player: PlatformId,
    operation: &'static str,
) -> impl FnOnce(ProviderError) -> TransitionError {
    move |source| TransitionError::Host {
        player,
        operation,
        source,
    }
}
