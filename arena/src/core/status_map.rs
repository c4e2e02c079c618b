//! Mapping from remote execution-run state to local agent stage.

use crate::core::types::{AgentStatus, RemoteRunState};

/// Map a remote run state to the local agent stage.
///
/// Total and fail-open: unrecognized states map to `Initializing`.
pub fn map_run_state(state: &RemoteRunState) -> AgentStatus {
    match state {
        RemoteRunState::Queued | RemoteRunState::Pending | RemoteRunState::Claimed => {
            AgentStatus::Initializing
        }
        RemoteRunState::InProgress => AgentStatus::Developing,
        RemoteRunState::Succeeded => AgentStatus::Pushing,
        RemoteRunState::Failed | RemoteRunState::Cancelled => AgentStatus::Failed,
        RemoteRunState::Unrecognized(_) => AgentStatus::Initializing,
    }
}
