//! Deployment outcome for an agent's branch, inferred from the code host.
//!
//! Providers leave different traces: some register a deployment object, some
//! only post a commit status, some leave nothing until a CI workflow finishes.
//! [`FallbackDeploymentMonitor`] walks those sources in a fixed order and
//! stops at the first one that answers:
//!
//! 1. branch missing -> `not_found`
//! 2. resolve head commit and latest workflow run
//! 3. deployments by branch, then by head commit
//! 4. latest deployment status (by creation time) decides
//! 5. otherwise the workflow run decides, with commit statuses supplying the
//!    preview address

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::core::dashboard::{PreviewHosts, PreviewKind};
use crate::core::types::{DeploymentStatus, RepoCoordinate};
use crate::error::ArenaResult;
use crate::io::code_host::{CodeHost, CommitStatus, DeploymentStatusRecord, WorkflowRun};

/// Result of one deployment check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentCheck {
    pub status: DeploymentStatus,
    pub preview_url: Option<String>,
    pub workflow_run_id: Option<u64>,
    pub deployment_id: Option<u64>,
}

impl DeploymentCheck {
    pub fn not_found() -> Self {
        Self {
            status: DeploymentStatus::NotFound,
            preview_url: None,
            workflow_run_id: None,
            deployment_id: None,
        }
    }
}

#[async_trait]
pub trait DeploymentMonitor: Send + Sync {
    async fn check(&self, repo: &RepoCoordinate, branch: &str) -> ArenaResult<DeploymentCheck>;
}

/// [`DeploymentMonitor`] implementing the fallback chain over a [`CodeHost`].
#[derive(Debug, Clone)]
pub struct FallbackDeploymentMonitor<C> {
    host: C,
    preview_hosts: PreviewHosts,
}

impl<C: CodeHost> FallbackDeploymentMonitor<C> {
    pub fn new(host: C, preview_hosts: PreviewHosts) -> Self {
        Self {
            host,
            preview_hosts,
        }
    }

    async fn scan_commit_statuses(
        &self,
        repo: &RepoCoordinate,
        sha: &str,
    ) -> ArenaResult<Option<String>> {
        let statuses = self.host.commit_statuses(repo, sha).await?;
        Ok(best_preview(&statuses, &self.preview_hosts))
    }
}

#[async_trait]
impl<C: CodeHost> DeploymentMonitor for FallbackDeploymentMonitor<C> {
    #[instrument(skip_all, fields(repo = %repo, branch))]
    async fn check(&self, repo: &RepoCoordinate, branch: &str) -> ArenaResult<DeploymentCheck> {
        let Some(head_sha) = self.host.branch_head(repo, branch).await? else {
            debug!("branch not pushed yet");
            return Ok(DeploymentCheck::not_found());
        };

        let workflow_run = latest_workflow_run(self.host.workflow_runs(repo, branch).await?);
        let workflow_run_id = workflow_run.as_ref().map(|run| run.id);

        let mut deployments = self.host.deployments(repo, branch).await?;
        if deployments.is_empty() {
            deployments = self.host.deployments(repo, &head_sha).await?;
        }
        let deployment = deployments.into_iter().max_by_key(|d| d.created_at);

        if let Some(deployment) = deployment {
            let statuses = self.host.deployment_statuses(repo, deployment.id).await?;
            let latest = latest_deployment_status(statuses);
            let status = latest
                .as_ref()
                .map(|record| map_deployment_state(&record.state))
                .unwrap_or(DeploymentStatus::Pending);
            let mut preview_url = None;
            if status == DeploymentStatus::Success {
                preview_url = latest
                    .and_then(|record| record.environment_url.or(record.target_url))
                    .filter(|url| !url.trim().is_empty());
                if preview_url.is_none() {
                    preview_url = self.scan_commit_statuses(repo, &head_sha).await?;
                }
            }
            debug!(deployment_id = deployment.id, ?status, "deployment record found");
            return Ok(DeploymentCheck {
                status,
                preview_url,
                workflow_run_id,
                deployment_id: Some(deployment.id),
            });
        }

        let Some(run) = workflow_run else {
            // Some providers publish only a commit status.
            let preview_url = self.scan_commit_statuses(repo, &head_sha).await?;
            let status = if preview_url.is_some() {
                DeploymentStatus::Success
            } else {
                DeploymentStatus::NotFound
            };
            debug!(?status, "no deployment record or workflow run");
            return Ok(DeploymentCheck {
                status,
                preview_url,
                workflow_run_id: None,
                deployment_id: None,
            });
        };

        let status = map_workflow_run(&run);
        let preview_url = if status == DeploymentStatus::Success {
            self.scan_commit_statuses(repo, &head_sha).await?
        } else {
            None
        };
        debug!(workflow_run_id = run.id, ?status, "falling back to workflow run");
        Ok(DeploymentCheck {
            status,
            preview_url,
            workflow_run_id: Some(run.id),
            deployment_id: None,
        })
    }
}

fn latest_workflow_run(runs: Vec<WorkflowRun>) -> Option<WorkflowRun> {
    runs.into_iter().max_by_key(|run| run.created_at)
}

/// Pick the status with the greatest creation time, independent of the order
/// the host returned them in.
pub fn latest_deployment_status(
    statuses: Vec<DeploymentStatusRecord>,
) -> Option<DeploymentStatusRecord> {
    statuses.into_iter().max_by_key(|record| record.created_at)
}

pub fn map_deployment_state(state: &str) -> DeploymentStatus {
    match state {
        "success" => DeploymentStatus::Success,
        "failure" | "error" => DeploymentStatus::Failure,
        _ => DeploymentStatus::Pending,
    }
}

fn map_workflow_run(run: &WorkflowRun) -> DeploymentStatus {
    if run.status != "completed" {
        return DeploymentStatus::Pending;
    }
    match run.conclusion.as_deref() {
        Some("success") => DeploymentStatus::Success,
        Some("failure" | "timed_out" | "cancelled" | "startup_failure") => {
            DeploymentStatus::Failure
        }
        _ => DeploymentStatus::Pending,
    }
}

/// Best preview address among successful commit statuses: a deployed host
/// beats a dashboard page; anything else is ignored.
fn best_preview(statuses: &[CommitStatus], hosts: &PreviewHosts) -> Option<String> {
    let mut dashboard = None;
    for status in statuses.iter().filter(|status| status.state == "success") {
        let Some(url) = status.target_url.as_deref() else {
            continue;
        };
        match hosts.classify(url) {
            PreviewKind::Direct => return Some(url.to_string()),
            PreviewKind::Dashboard if dashboard.is_none() => dashboard = Some(url.to_string()),
            PreviewKind::Dashboard | PreviewKind::Other => {}
        }
    }
    dashboard
}
