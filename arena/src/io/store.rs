//! In-memory job repository.
//!
//! All state lives behind a single async `RwLock`, so every operation is
//! atomic with respect to every other: the orchestrator and the HTTP layer can
//! never observe or produce a half-updated agent. No operation awaits anything
//! but the lock itself.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::types::{Agent, AgentStatus, AgentUpdate, Job, JobStatus, Verification};
use crate::error::{ArenaError, ArenaResult};

/// Repository of jobs and agents.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job. Fails with `Conflict` if the job id or any run id is
    /// already known.
    async fn create_job(&self, job: Job) -> ArenaResult<Job>;

    async fn get_job(&self, job_id: &str) -> Option<Job>;

    async fn contains_job(&self, job_id: &str) -> bool;

    /// All jobs, most recently created first.
    async fn list_jobs(&self) -> Vec<Job>;

    /// Merge `update` into the agent with `run_id`. Returns false (and does
    /// nothing) when the job or agent is unknown.
    async fn update_agent(&self, job_id: &str, run_id: &str, update: AgentUpdate) -> bool;

    /// Same as [`JobRepository::update_agent`], but discards the update when
    /// the job has already been completed by a human.
    async fn update_agent_unless_completed(
        &self,
        job_id: &str,
        run_id: &str,
        update: AgentUpdate,
    ) -> bool;

    /// Advance the job status. Backward or same-state moves are ignored and
    /// return false.
    async fn update_job_status(&self, job_id: &str, status: JobStatus) -> bool;

    async fn get_agent_by_run_id(&self, run_id: &str) -> Option<(Job, Agent)>;

    /// Complete a job with the given winners. Every winner must be `ready`.
    async fn select_winners(&self, job_id: &str, agent_ids: &[String]) -> ArenaResult<Job>;

    async fn record_verification(
        &self,
        job_id: &str,
        agent_id: &str,
        verification: Verification,
    ) -> ArenaResult<()>;
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<String, Job>,
    /// run id -> job id
    run_index: HashMap<String, String>,
}

impl StoreInner {
    fn agent_mut(&mut self, job_id: &str, run_id: &str) -> Option<&mut Agent> {
        self.jobs
            .get_mut(job_id)?
            .agents
            .iter_mut()
            .find(|agent| agent.run_id == run_id)
    }
}

/// [`JobRepository`] backed by a lock-guarded map. Process-lifetime only.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobStore {
    async fn create_job(&self, job: Job) -> ArenaResult<Job> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(ArenaError::Conflict(format!("job {} already exists", job.id)));
        }
        if let Some(agent) = job
            .agents
            .iter()
            .find(|agent| inner.run_index.contains_key(&agent.run_id))
        {
            return Err(ArenaError::Conflict(format!(
                "run {} is already tracked",
                agent.run_id
            )));
        }
        for agent in &job.agents {
            inner.run_index.insert(agent.run_id.clone(), job.id.clone());
        }
        debug!(job_id = %job.id, agents = job.agents.len(), "job stored");
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner.read().await.jobs.get(job_id).cloned()
    }

    async fn contains_job(&self, job_id: &str) -> bool {
        self.inner.read().await.jobs.contains_key(job_id)
    }

    async fn list_jobs(&self) -> Vec<Job> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    async fn update_agent(&self, job_id: &str, run_id: &str, update: AgentUpdate) -> bool {
        let mut inner = self.inner.write().await;
        match inner.agent_mut(job_id, run_id) {
            Some(agent) => {
                agent.apply(update);
                true
            }
            None => false,
        }
    }

    async fn update_agent_unless_completed(
        &self,
        job_id: &str,
        run_id: &str,
        update: AgentUpdate,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let completed = inner
            .jobs
            .get(job_id)
            .is_some_and(|job| job.status == JobStatus::Completed);
        if completed {
            debug!(job_id, run_id, "job completed meanwhile, discarding agent update");
            return false;
        }
        match inner.agent_mut(job_id, run_id) {
            Some(agent) => {
                agent.apply(update);
                true
            }
            None => false,
        }
    }

    async fn update_job_status(&self, job_id: &str, status: JobStatus) -> bool {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if !job.status.can_advance_to(status) {
            return false;
        }
        job.status = status;
        true
    }

    async fn get_agent_by_run_id(&self, run_id: &str) -> Option<(Job, Agent)> {
        let inner = self.inner.read().await;
        let job = inner.jobs.get(inner.run_index.get(run_id)?)?;
        let agent = job.agent_by_run_id(run_id)?;
        Some((job.clone(), agent.clone()))
    }

    async fn select_winners(&self, job_id: &str, agent_ids: &[String]) -> ArenaResult<Job> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ArenaError::NotFound(format!("job {job_id}")))?;
        if agent_ids.is_empty() {
            return Err(ArenaError::InvalidSelection(
                "at least one agent must be selected".to_string(),
            ));
        }
        if job.status == JobStatus::Completed {
            return Err(ArenaError::Conflict(format!("job {job_id} is already completed")));
        }
        for agent_id in agent_ids {
            let agent = job
                .agent(agent_id)
                .ok_or_else(|| ArenaError::NotFound(format!("agent {agent_id} in job {job_id}")))?;
            if agent.status != AgentStatus::Ready {
                return Err(ArenaError::InvalidSelection(format!(
                    "agent {agent_id} is {}, only ready agents can be selected",
                    agent.status
                )));
            }
        }
        job.winners = agent_ids.to_vec();
        job.status = JobStatus::Completed;
        Ok(job.clone())
    }

    async fn record_verification(
        &self,
        job_id: &str,
        agent_id: &str,
        verification: Verification,
    ) -> ArenaResult<()> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ArenaError::NotFound(format!("job {job_id}")))?;
        let agent = job
            .agents
            .iter_mut()
            .find(|agent| agent.id == agent_id)
            .ok_or_else(|| ArenaError::NotFound(format!("agent {agent_id} in job {job_id}")))?;
        agent.verification = Some(verification);
        Ok(())
    }
}
