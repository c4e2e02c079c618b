//! Test-only builders and scripted collaborators.
//!
//! Every fake keeps its script behind a shared lock, so a test can hold an
//! `Arc` to it, hand a clone to the orchestrator and keep changing the script
//! between ticks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::core::dashboard::PreviewHosts;
use crate::core::naming::{agent_id, branch_name};
use crate::core::types::{
    Agent, AgentStatus, DeploymentStatus, Job, JobStatus, RemoteRunState, RepoCoordinate,
};
use crate::error::{ArenaError, ArenaResult};
use crate::io::clock::Clock;
use crate::io::code_host::{
    CodeHost, CommitStatus, Deployment, DeploymentStatusRecord, WorkflowRun,
};
use crate::io::execution::{ExecutionBackend, RunHandle, RunRequest, RunSnapshot};
use crate::io::preview::PreviewResolver;
use crate::monitor::{DeploymentCheck, DeploymentMonitor};

const EPOCH: i64 = 1_700_000_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test support lock poisoned")
}

/// Fixed timestamp `secs` seconds after a deterministic epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH + secs, 0).unwrap()
}

pub fn preview_hosts() -> PreviewHosts {
    PreviewHosts {
        preview_suffix: ".vercel.app".to_string(),
        dashboard_host: "vercel.com".to_string(),
    }
}

/// Agent `ordinal` of job `job` with the given run id and status.
pub fn agent_with_status(ordinal: u32, run_id: &str, status: AgentStatus) -> Agent {
    let mut agent = Agent::new(
        agent_id(ordinal),
        run_id,
        branch_name("job", ordinal),
        "default",
    );
    agent.status = status;
    agent
}

/// Processing job created at [`at(0)`](at) against `acme/web`.
pub fn job_with_agents(id: &str, agents: Vec<Agent>) -> Job {
    Job {
        id: id.to_string(),
        issue_id: format!("ISSUE-{id}"),
        repository: Some(RepoCoordinate::new("acme", "web")),
        status: JobStatus::Processing,
        created_at: at(0),
        title: format!("{id} title"),
        description: format!("{id} description"),
        agents,
        winners: Vec::new(),
    }
}

pub fn workflow_run(id: u64, status: &str, conclusion: Option<&str>, created: i64) -> WorkflowRun {
    WorkflowRun {
        id,
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
        created_at: at(created),
    }
}

pub fn deployment(id: u64, sha: &str, created: i64) -> Deployment {
    Deployment {
        id,
        sha: sha.to_string(),
        created_at: at(created),
    }
}

pub fn deployment_status(state: &str, url: Option<&str>, created: i64) -> DeploymentStatusRecord {
    DeploymentStatusRecord {
        state: state.to_string(),
        environment_url: url.map(str::to_string),
        target_url: None,
        created_at: at(created),
    }
}

pub fn commit_status(state: &str, target_url: &str) -> CommitStatus {
    CommitStatus {
        state: state.to_string(),
        context: "deploy".to_string(),
        target_url: Some(target_url.to_string()),
    }
}

pub fn snapshot(state: &str) -> RunSnapshot {
    RunSnapshot {
        state: RemoteRunState::parse(state),
        session_link: None,
        status_message: None,
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = lock(&self.now);
        *now += TimeDelta::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Debug, Default)]
struct BackendScript {
    runs: HashMap<String, RunSnapshot>,
    failing_runs: Vec<String>,
    hanging_runs: Vec<String>,
    get_run_calls: HashMap<String, usize>,
    requests: Vec<RunRequest>,
    failing_spawns: Vec<usize>,
    missing_credentials: bool,
}

/// Execution backend answering from a script.
///
/// `run_agent` hands out `run-1`, `run-2`, ... in call order; runs start out
/// `queued` until the test changes them.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<BackendScript>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, run_id: &str, state: &str) {
        let mut script = lock(&self.script);
        let entry = script
            .runs
            .entry(run_id.to_string())
            .or_insert_with(|| snapshot(state));
        entry.state = RemoteRunState::parse(state);
    }

    pub fn set_snapshot(&self, run_id: &str, snapshot: RunSnapshot) {
        lock(&self.script).runs.insert(run_id.to_string(), snapshot);
    }

    /// Make `get_run` fail for `run_id` until [`ScriptedBackend::recover`].
    pub fn fail_run(&self, run_id: &str) {
        lock(&self.script).failing_runs.push(run_id.to_string());
    }

    pub fn recover(&self, run_id: &str) {
        let mut script = lock(&self.script);
        script.failing_runs.retain(|id| id != run_id);
        script.hanging_runs.retain(|id| id != run_id);
    }

    /// Make `get_run` for `run_id` never answer.
    pub fn hang_run(&self, run_id: &str) {
        lock(&self.script).hanging_runs.push(run_id.to_string());
    }

    /// Make the `call`-th `run_agent` call (1-based) fail with a fetch error.
    pub fn fail_spawn(&self, call: usize) {
        lock(&self.script).failing_spawns.push(call);
    }

    pub fn without_credentials(&self) {
        lock(&self.script).missing_credentials = true;
    }

    pub fn get_run_calls(&self, run_id: &str) -> usize {
        lock(&self.script)
            .get_run_calls
            .get(run_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        lock(&self.script).requests.clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn run_agent(&self, request: &RunRequest) -> ArenaResult<RunHandle> {
        let mut script = lock(&self.script);
        if script.missing_credentials {
            return Err(ArenaError::Configuration(
                "ARENA_EXECUTION_API_KEY is not set".to_string(),
            ));
        }
        script.requests.push(request.clone());
        let call = script.requests.len();
        if script.failing_spawns.contains(&call) {
            return Err(ArenaError::Fetch(format!("run request {call} rejected")));
        }
        let run_id = format!("run-{call}");
        script.runs.insert(run_id.clone(), snapshot("queued"));
        Ok(RunHandle {
            run_id: run_id.clone(),
            state: RemoteRunState::Queued,
            session_link: Some(format!("https://sessions.example.com/{run_id}")),
        })
    }

    async fn get_run(&self, run_id: &str) -> ArenaResult<RunSnapshot> {
        let hang = {
            let mut script = lock(&self.script);
            *script.get_run_calls.entry(run_id.to_string()).or_default() += 1;
            if script.failing_runs.iter().any(|id| id == run_id) {
                return Err(ArenaError::Fetch(format!("run {run_id} unavailable")));
            }
            script.hanging_runs.iter().any(|id| id == run_id)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        lock(&self.script)
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| ArenaError::NotFound(format!("run {run_id}")))
    }
}

#[derive(Debug, Default)]
struct CodeHostScript {
    branches: HashMap<String, String>,
    workflow_runs: HashMap<String, Vec<WorkflowRun>>,
    deployments: HashMap<String, Vec<Deployment>>,
    deployment_statuses: HashMap<u64, Vec<DeploymentStatusRecord>>,
    commit_statuses: HashMap<String, Vec<CommitStatus>>,
    calls: Vec<String>,
}

/// Code host answering from a script and recording every query.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCodeHost {
    script: Arc<Mutex<CodeHostScript>>,
}

impl ScriptedCodeHost {
    pub fn with_branch(self, branch: &str, sha: &str) -> Self {
        lock(&self.script)
            .branches
            .insert(branch.to_string(), sha.to_string());
        self
    }

    pub fn with_workflow_runs(self, branch: &str, runs: Vec<WorkflowRun>) -> Self {
        lock(&self.script)
            .workflow_runs
            .insert(branch.to_string(), runs);
        self
    }

    pub fn with_deployments(self, git_ref: &str, deployments: Vec<Deployment>) -> Self {
        lock(&self.script)
            .deployments
            .insert(git_ref.to_string(), deployments);
        self
    }

    pub fn with_deployment_statuses(
        self,
        deployment_id: u64,
        statuses: Vec<DeploymentStatusRecord>,
    ) -> Self {
        lock(&self.script)
            .deployment_statuses
            .insert(deployment_id, statuses);
        self
    }

    pub fn with_commit_statuses(self, git_ref: &str, statuses: Vec<CommitStatus>) -> Self {
        lock(&self.script)
            .commit_statuses
            .insert(git_ref.to_string(), statuses);
        self
    }

    /// Queries made so far, as `"<operation> <argument>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.script).calls.clone()
    }

    fn record(&self, call: String) -> MutexGuard<'_, CodeHostScript> {
        let mut script = lock(&self.script);
        script.calls.push(call);
        script
    }
}

#[async_trait]
impl CodeHost for ScriptedCodeHost {
    async fn branch_head(&self, _repo: &RepoCoordinate, branch: &str) -> ArenaResult<Option<String>> {
        let script = self.record(format!("branch_head {branch}"));
        Ok(script.branches.get(branch).cloned())
    }

    async fn workflow_runs(
        &self,
        _repo: &RepoCoordinate,
        branch: &str,
    ) -> ArenaResult<Vec<WorkflowRun>> {
        let script = self.record(format!("workflow_runs {branch}"));
        Ok(script.workflow_runs.get(branch).cloned().unwrap_or_default())
    }

    async fn deployments(
        &self,
        _repo: &RepoCoordinate,
        git_ref: &str,
    ) -> ArenaResult<Vec<Deployment>> {
        let script = self.record(format!("deployments {git_ref}"));
        Ok(script.deployments.get(git_ref).cloned().unwrap_or_default())
    }

    async fn deployment_statuses(
        &self,
        _repo: &RepoCoordinate,
        deployment_id: u64,
    ) -> ArenaResult<Vec<DeploymentStatusRecord>> {
        let script = self.record(format!("deployment_statuses {deployment_id}"));
        Ok(script
            .deployment_statuses
            .get(&deployment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_statuses(
        &self,
        _repo: &RepoCoordinate,
        git_ref: &str,
    ) -> ArenaResult<Vec<CommitStatus>> {
        let script = self.record(format!("commit_statuses {git_ref}"));
        Ok(script.commit_statuses.get(git_ref).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct MonitorScript {
    checks: HashMap<String, DeploymentCheck>,
    failing: HashMap<String, bool>,
    calls: HashMap<String, usize>,
}

/// Deployment monitor answering per branch. Unscripted branches are
/// `not_found`.
#[derive(Debug, Default)]
pub struct ScriptedMonitor {
    script: Mutex<MonitorScript>,
}

impl ScriptedMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, branch: &str, status: DeploymentStatus, preview_url: Option<&str>) {
        lock(&self.script).checks.insert(
            branch.to_string(),
            DeploymentCheck {
                status,
                preview_url: preview_url.map(str::to_string),
                workflow_run_id: Some(1),
                deployment_id: None,
            },
        );
    }

    /// Fail checks for `branch`; `configuration` selects the error kind.
    pub fn fail(&self, branch: &str, configuration: bool) {
        lock(&self.script)
            .failing
            .insert(branch.to_string(), configuration);
    }

    pub fn calls(&self, branch: &str) -> usize {
        lock(&self.script).calls.get(branch).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeploymentMonitor for ScriptedMonitor {
    async fn check(&self, _repo: &RepoCoordinate, branch: &str) -> ArenaResult<DeploymentCheck> {
        let mut script = lock(&self.script);
        *script.calls.entry(branch.to_string()).or_default() += 1;
        match script.failing.get(branch) {
            Some(true) => Err(ArenaError::Configuration(
                "ARENA_GITHUB_TOKEN is not set".to_string(),
            )),
            Some(false) => Err(ArenaError::Fetch(format!("code host unavailable for {branch}"))),
            None => Ok(script
                .checks
                .get(branch)
                .cloned()
                .unwrap_or_else(DeploymentCheck::not_found)),
        }
    }
}

/// Preview resolver with a fixed reference -> address table.
#[derive(Debug, Default)]
pub struct StaticPreviewResolver {
    addresses: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl StaticPreviewResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: &str, address: &str) {
        lock(&self.addresses).insert(reference.to_string(), address.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl PreviewResolver for StaticPreviewResolver {
    async fn resolve(&self, reference: &str) -> Option<String> {
        lock(&self.calls).push(reference.to_string());
        lock(&self.addresses).get(reference).cloned()
    }
}
