//! Job creation: one remote run per requested agent slot.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::core::naming::{agent_id, branch_name};
use crate::core::types::{Agent, Job, JobStatus, RepoCoordinate};
use crate::error::{ArenaError, ArenaResult};
use crate::events::{ArenaEvent, EventBus};
use crate::io::clock::Clock;
use crate::io::config::{DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT};
use crate::io::execution::{ExecutionBackend, RunRequest};
use crate::io::prompt::{TaskPromptInput, render_task_prompt};
use crate::io::store::JobRepository;
use crate::orchestrator::PollingOrchestrator;

const JOB_ID_LEN: usize = 8;

/// `count` agents running `model` (or the configured default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSlot {
    pub model: Option<String>,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub issue_id: String,
    pub title: String,
    pub description: String,
    pub repository: Option<RepoCoordinate>,
    pub agents: Vec<AgentSlot>,
}

impl SpawnRequest {
    fn total_agents(&self) -> u32 {
        self.agents.iter().map(|slot| slot.count).sum()
    }
}

pub struct JobSpawner {
    store: Arc<dyn JobRepository>,
    backend: Arc<dyn ExecutionBackend>,
    orchestrator: Arc<PollingOrchestrator>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    default_model: String,
    call_timeout: Duration,
}

impl JobSpawner {
    pub fn new(
        store: Arc<dyn JobRepository>,
        backend: Arc<dyn ExecutionBackend>,
        orchestrator: Arc<PollingOrchestrator>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            backend,
            orchestrator,
            clock,
            events,
            default_model: DEFAULT_MODEL.to_string(),
            call_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Start every requested agent, persist the job and hand it to the
    /// orchestrator.
    ///
    /// Agents whose run request fails are left out (their ordinal is not
    /// reused). A configuration error aborts the whole spawn, as does ending
    /// up with no agent at all.
    #[instrument(skip_all, fields(issue_id = %request.issue_id))]
    pub async fn spawn(&self, request: SpawnRequest) -> ArenaResult<Job> {
        if request.total_agents() == 0 {
            return Err(ArenaError::InvalidRequest(
                "at least one agent must be requested".to_string(),
            ));
        }
        let job_id = self.allocate_job_id().await;

        let mut agents = Vec::new();
        let mut ordinal = 0;
        for slot in &request.agents {
            let model = slot
                .model
                .as_deref()
                .filter(|model| !model.trim().is_empty())
                .unwrap_or(self.default_model.as_str());
            for _ in 0..slot.count {
                ordinal += 1;
                if let Some(agent) = self.start_agent(&job_id, ordinal, model, &request).await? {
                    agents.push(agent);
                }
            }
        }
        if agents.is_empty() {
            return Err(ArenaError::Fetch(format!(
                "none of the {} requested agents could be started",
                request.total_agents()
            )));
        }

        let job = Job {
            id: job_id,
            issue_id: request.issue_id,
            repository: request.repository,
            status: JobStatus::Processing,
            created_at: self.clock.now(),
            title: request.title,
            description: request.description,
            agents,
            winners: Vec::new(),
        };
        let job = self.store.create_job(job).await?;
        self.orchestrator.register(&job).await;
        info!(job_id = %job.id, agents = job.agents.len(), "job spawned");
        self.events.publish(ArenaEvent::JobCreated {
            job_id: job.id.clone(),
        });
        Ok(job)
    }

    async fn allocate_job_id(&self) -> String {
        loop {
            let candidate = generate_job_id();
            if !self.store.contains_job(&candidate).await {
                return candidate;
            }
        }
    }

    /// `Ok(None)` when the run request failed for a reason that only affects
    /// this agent.
    async fn start_agent(
        &self,
        job_id: &str,
        ordinal: u32,
        model: &str,
        request: &SpawnRequest,
    ) -> ArenaResult<Option<Agent>> {
        let branch = branch_name(job_id, ordinal);
        let prompt = render_task_prompt(&TaskPromptInput {
            issue_id: &request.issue_id,
            title: &request.title,
            description: &request.description,
            repository: request.repository.as_ref(),
            branch: &branch,
        })?;
        let run_request = RunRequest {
            prompt,
            title: format!("{} ({})", request.title.trim(), agent_id(ordinal)),
            model: model.to_string(),
        };
        let result = match timeout(self.call_timeout, self.backend.run_agent(&run_request)).await {
            Ok(result) => result,
            Err(_) => Err(ArenaError::Fetch(format!(
                "run request timed out after {:?}",
                self.call_timeout
            ))),
        };
        let handle = match result {
            Ok(handle) => handle,
            Err(err) if err.is_configuration() => return Err(err),
            Err(err) => {
                warn!(job_id, ordinal, error = %err, "agent could not be started, skipping");
                return Ok(None);
            }
        };

        let mut agent = Agent::new(agent_id(ordinal), handle.run_id, branch, model);
        agent.session_link = handle.session_link;
        agent
            .logs
            .push_event(format!("run {} requested with model {model}", agent.run_id));
        Ok(Some(agent))
    }
}

/// Short random job identifier (lowercase letters and digits).
pub fn generate_job_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JOB_ID_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}
