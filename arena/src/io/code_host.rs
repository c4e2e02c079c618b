//! Code host abstraction (branches, workflow runs, deployments, statuses).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::core::types::RepoCoordinate;
use crate::error::{ArenaError, ArenaResult};
use crate::io::config::ENV_GITHUB_TOKEN;
use crate::io::http::{build_client, endpoint, parse_base, request_json};

const WORKFLOW_RUNS_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    /// `queued`, `in_progress`, `completed`, ...
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Deployment {
    pub id: u64,
    #[serde(default)]
    pub sha: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeploymentStatusRecord {
    pub state: String,
    #[serde(default)]
    pub environment_url: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitStatus {
    pub state: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub target_url: Option<String>,
}

/// Read-only queries the deployment monitor needs from the code host.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Head commit SHA of `branch`, or `None` if the branch does not exist.
    async fn branch_head(&self, repo: &RepoCoordinate, branch: &str) -> ArenaResult<Option<String>>;

    async fn workflow_runs(&self, repo: &RepoCoordinate, branch: &str)
    -> ArenaResult<Vec<WorkflowRun>>;

    /// Deployments recorded against a branch name or commit SHA.
    async fn deployments(&self, repo: &RepoCoordinate, git_ref: &str)
    -> ArenaResult<Vec<Deployment>>;

    /// Statuses of one deployment, in whatever order the host returns them.
    async fn deployment_statuses(
        &self,
        repo: &RepoCoordinate,
        deployment_id: u64,
    ) -> ArenaResult<Vec<DeploymentStatusRecord>>;

    async fn commit_statuses(&self, repo: &RepoCoordinate, git_ref: &str)
    -> ArenaResult<Vec<CommitStatus>>;
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct CombinedStatusResponse {
    #[serde(default)]
    statuses: Vec<CommitStatus>,
}

/// [`CodeHost`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubCodeHost {
    api_url: Url,
    token: Option<String>,
    client: Client,
}

impl GitHubCodeHost {
    pub fn new(api_url: &str, token: Option<String>, timeout: Duration) -> ArenaResult<Self> {
        Ok(Self {
            api_url: parse_base("github", api_url)?,
            token,
            client: build_client(timeout)?,
        })
    }

    fn get(&self, repo: &RepoCoordinate, path: &[&str]) -> ArenaResult<RequestBuilder> {
        let token = self.token.as_deref().ok_or_else(|| {
            ArenaError::Configuration(format!(
                "{ENV_GITHUB_TOKEN} is not set. Deployment checks are disabled."
            ))
        })?;
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(path);
        let url = endpoint(&self.api_url, &segments);
        Ok(self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        repo: &RepoCoordinate,
        path: &[&str],
    ) -> ArenaResult<T> {
        request_json("github", self.get(repo, path)?).await
    }
}

#[async_trait]
impl CodeHost for GitHubCodeHost {
    async fn branch_head(&self, repo: &RepoCoordinate, branch: &str) -> ArenaResult<Option<String>> {
        match self.fetch::<BranchResponse>(repo, &["branches", branch]).await {
            Ok(response) => Ok(Some(response.commit.sha)),
            Err(ArenaError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn workflow_runs(
        &self,
        repo: &RepoCoordinate,
        branch: &str,
    ) -> ArenaResult<Vec<WorkflowRun>> {
        let request = self
            .get(repo, &["actions", "runs"])?
            .query(&[("branch", branch)])
            .query(&[("per_page", WORKFLOW_RUNS_PAGE_SIZE)]);
        let response: WorkflowRunsResponse = request_json("github", request).await?;
        Ok(response.workflow_runs)
    }

    async fn deployments(
        &self,
        repo: &RepoCoordinate,
        git_ref: &str,
    ) -> ArenaResult<Vec<Deployment>> {
        let request = self.get(repo, &["deployments"])?.query(&[("ref", git_ref)]);
        request_json("github", request).await
    }

    async fn deployment_statuses(
        &self,
        repo: &RepoCoordinate,
        deployment_id: u64,
    ) -> ArenaResult<Vec<DeploymentStatusRecord>> {
        let id = deployment_id.to_string();
        self.fetch(repo, &["deployments", id.as_str(), "statuses"]).await
    }

    async fn commit_statuses(
        &self,
        repo: &RepoCoordinate,
        git_ref: &str,
    ) -> ArenaResult<Vec<CommitStatus>> {
        match self
            .fetch::<CombinedStatusResponse>(repo, &["commits", git_ref, "status"])
            .await
        {
            Ok(response) => Ok(response.statuses),
            Err(ArenaError::NotFound(_)) => Ok(Vec::new()),
            Err(error) => Err(error),
        }
    }
}
