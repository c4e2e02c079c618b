//! Shared deterministic types for arena core logic.
//!
//! These types define the contracts between the store, the orchestrator and
//! the human-facing layer. Every status family is a closed enum so each
//! decision point (status mapping, merge, termination) is matched exhaustively.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a job. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    ReviewNeeded,
    Completed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Processing => 0,
            JobStatus::ReviewNeeded => 1,
            JobStatus::Completed => 2,
        }
    }

    /// Returns true if moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::ReviewNeeded => "review_needed",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage of a single agent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Developing,
    /// Execution succeeded; the deployment pipeline is now authoritative.
    Pushing,
    Deploying,
    Ready,
    Failed,
    DeploymentFailed,
}

impl AgentStatus {
    /// Terminal statuses see no further automatic transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Ready | AgentStatus::Failed | AgentStatus::DeploymentFailed
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, AgentStatus::Failed | AgentStatus::DeploymentFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Developing => "developing",
            AgentStatus::Pushing => "pushing",
            AgentStatus::Deploying => "deploying",
            AgentStatus::Ready => "ready",
            AgentStatus::Failed => "failed",
            AgentStatus::DeploymentFailed => "deployment_failed",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by the remote execution backend for a run.
///
/// Parsing never fails: values the backend adds later land in `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRunState {
    Queued,
    Pending,
    Claimed,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    Unrecognized(String),
}

impl RemoteRunState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "queued" => RemoteRunState::Queued,
            "pending" => RemoteRunState::Pending,
            "claimed" => RemoteRunState::Claimed,
            "in_progress" | "inprogress" => RemoteRunState::InProgress,
            "succeeded" => RemoteRunState::Succeeded,
            "failed" => RemoteRunState::Failed,
            "cancelled" | "canceled" => RemoteRunState::Cancelled,
            _ => RemoteRunState::Unrecognized(raw.to_string()),
        }
    }
}

/// Outcome reported by the deployment monitor for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Success,
    Failure,
    NotFound,
}

/// Repository coordinate on the code host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoCoordinate {
    pub owner: String,
    pub name: String,
}

impl RepoCoordinate {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub reason: String,
}

/// Bookkeeping from the most recent deployment check for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTracking {
    pub workflow_run_id: Option<u64>,
    pub deployment_id: Option<u64>,
    pub last_checked: DateTime<Utc>,
}

/// Append-only agent log.
///
/// Event lines are never rewritten. The most recent progress line stays
/// "live" and is replaced in place until an event line closes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentLog {
    lines: Vec<String>,
    #[serde(skip)]
    live_tail: bool,
    #[serde(skip)]
    last_progress: Option<String>,
}

impl AgentLog {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn push_event(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
        self.live_tail = false;
    }

    /// Set the live progress line. Returns false when the message is the one
    /// already recorded.
    pub fn set_progress(&mut self, line: &str) -> bool {
        if self.last_progress.as_deref() == Some(line) {
            return false;
        }
        self.last_progress = Some(line.to_string());
        if self.live_tail
            && let Some(last) = self.lines.last_mut()
        {
            *last = line.to_string();
            return true;
        }
        self.lines.push(line.to_string());
        self.live_tail = true;
        true
    }

    /// Most recent progress message, whether or not its line is still live.
    pub fn last_progress(&self) -> Option<&str> {
        self.last_progress.as_deref()
    }
}

/// One independent attempt within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable label within the job (`agent-<ordinal>`).
    pub id: String,
    /// Execution-run identifier; globally unique reconciliation key.
    pub run_id: String,
    pub status: AgentStatus,
    pub logs: AgentLog,
    pub preview_url: Option<String>,
    pub dashboard_url: Option<String>,
    pub session_link: Option<String>,
    pub verification: Option<Verification>,
    pub branch: String,
    pub model: String,
    pub deployment: Option<DeploymentTracking>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        branch: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            status: AgentStatus::Initializing,
            logs: AgentLog::default(),
            preview_url: None,
            dashboard_url: None,
            session_link: None,
            verification: None,
            branch: branch.into(),
            model: model.into(),
            deployment: None,
        }
    }

    /// Merge the supplied fields of `update` into this agent.
    pub fn apply(&mut self, update: AgentUpdate) {
        if let Some(status) = update.status {
            if status != self.status {
                self.logs.push_event(format!("{} -> {}", self.status, status));
            }
            self.status = status;
        }
        for line in update.events {
            self.logs.push_event(line);
        }
        if let Some(progress) = update.progress {
            self.logs.set_progress(&progress);
        }
        if let Some(url) = update.preview_url {
            self.preview_url = Some(url);
        }
        if let Some(url) = update.dashboard_url {
            self.dashboard_url = Some(url);
        }
        if let Some(link) = update.session_link {
            self.session_link = Some(link);
        }
        if let Some(verification) = update.verification {
            self.verification = Some(verification);
        }
        if let Some(deployment) = update.deployment {
            self.deployment = Some(deployment);
        }
    }
}

/// Partial agent update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentUpdate {
    pub status: Option<AgentStatus>,
    pub events: Vec<String>,
    pub progress: Option<String>,
    pub preview_url: Option<String>,
    pub dashboard_url: Option<String>,
    pub session_link: Option<String>,
    pub verification: Option<Verification>,
    pub deployment: Option<DeploymentTracking>,
}

impl AgentUpdate {
    pub fn is_empty(&self) -> bool {
        self == &AgentUpdate::default()
    }
}

/// One human-initiated request for competing solutions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub issue_id: String,
    pub repository: Option<RepoCoordinate>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    /// Spawn order.
    pub agents: Vec<Agent>,
    /// Agents a human picked when completing the job.
    pub winners: Vec<String>,
}

impl Job {
    pub fn agent_by_run_id(&self, run_id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.run_id == run_id)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == agent_id)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            created_at: self.created_at,
            agent_count: self.agents.len(),
            ready_count: self
                .agents
                .iter()
                .filter(|agent| agent.status == AgentStatus::Ready)
                .count(),
        }
    }
}

/// List view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub title: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub agent_count: usize,
    pub ready_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_only_advances_forward() {
        assert!(JobStatus::Processing.can_advance_to(JobStatus::ReviewNeeded));
        assert!(JobStatus::Processing.can_advance_to(JobStatus::Completed));
        assert!(JobStatus::ReviewNeeded.can_advance_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Processing));
        assert!(!JobStatus::ReviewNeeded.can_advance_to(JobStatus::ReviewNeeded));
    }

    #[test]
    fn remote_state_parse_is_total() {
        assert_eq!(RemoteRunState::parse("in-progress"), RemoteRunState::InProgress);
        assert_eq!(RemoteRunState::parse("CANCELLED"), RemoteRunState::Cancelled);
        assert_eq!(
            RemoteRunState::parse("paused"),
            RemoteRunState::Unrecognized("paused".to_string())
        );
    }

    #[test]
    fn progress_line_is_replaced_until_an_event_closes_it() {
        let mut log = AgentLog::default();
        assert!(log.set_progress("cloning"));
        assert!(log.set_progress("editing files"));
        assert!(!log.set_progress("editing files"));
        assert_eq!(log.lines(), ["editing files"]);

        log.push_event("developing -> pushing");
        assert!(!log.set_progress("editing files"));
        assert_eq!(log.last_progress(), Some("editing files"));
        assert!(log.set_progress("done"));
        assert_eq!(log.lines(), ["editing files", "developing -> pushing", "done"]);
    }

    #[test]
    fn apply_logs_status_transitions_once() {
        let mut agent = Agent::new("agent-1", "run-1", "arena/abc/agent-1", "model-a");
        agent.apply(AgentUpdate {
            status: Some(AgentStatus::Developing),
            ..AgentUpdate::default()
        });
        agent.apply(AgentUpdate {
            status: Some(AgentStatus::Developing),
            ..AgentUpdate::default()
        });
        assert_eq!(agent.logs.lines(), ["initializing -> developing"]);
    }

    #[test]
    fn log_serializes_as_plain_lines() {
        let mut log = AgentLog::default();
        log.push_event("a");
        log.set_progress("b");
        let json = serde_json::to_string(&log).expect("serialize");
        assert_eq!(json, r#"["a","b"]"#);
    }
}
