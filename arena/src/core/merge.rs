//! Merge of execution-derived and deployment-derived agent status.

use crate::core::types::{AgentStatus, DeploymentStatus};

/// Combine the status mapped from the execution run with the deployment
/// outcome (when one was consulted) into the agent's final status.
///
/// `NotFound` keeps the agent at `Pushing`, so an agent that was `Deploying`
/// on the previous tick moves back to `Pushing` when its deployment record is
/// no longer visible. Terminal agents are never re-merged by the orchestrator.
pub fn merge_status(candidate: AgentStatus, deployment: Option<DeploymentStatus>) -> AgentStatus {
    match candidate {
        AgentStatus::Pushing => match deployment {
            Some(DeploymentStatus::Success) => AgentStatus::Ready,
            Some(DeploymentStatus::Failure) => AgentStatus::DeploymentFailed,
            Some(DeploymentStatus::Pending) => AgentStatus::Deploying,
            Some(DeploymentStatus::NotFound) | None => AgentStatus::Pushing,
        },
        AgentStatus::Failed => AgentStatus::Failed,
        AgentStatus::Initializing
        | AgentStatus::Developing
        | AgentStatus::Deploying
        | AgentStatus::Ready
        | AgentStatus::DeploymentFailed => candidate,
    }
}
