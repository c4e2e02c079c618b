//! Periodic reconciliation of active jobs.
//!
//! One global tick drives everything. Each tick snapshots the active set,
//! reconciles every job concurrently (and every agent within a job
//! concurrently), then evaluates the termination policy per job. Converged,
//! completed or vanished jobs leave the active set; the store keeps them.
//!
//! Every external call is bounded by the request timeout and fails in
//! isolation: a slow or broken agent costs only that agent's update for the
//! tick. Updates landing after a human completed the job are discarded by the
//! store, so a finished job is never resurrected.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, instrument, warn};

use crate::core::dashboard::{PreviewHosts, PreviewKind};
use crate::core::merge::merge_status;
use crate::core::status_map::map_run_state;
use crate::core::termination::{ConvergenceReason, JobProgress, TerminationPolicy};
use crate::core::types::{Agent, AgentStatus, AgentUpdate, DeploymentTracking, Job, JobStatus};
use crate::error::{ArenaError, ArenaResult};
use crate::events::{ArenaEvent, EventBus};
use crate::io::clock::Clock;
use crate::io::config::ArenaConfig;
use crate::io::execution::ExecutionBackend;
use crate::io::preview::PreviewResolver;
use crate::io::store::JobRepository;
use crate::monitor::DeploymentMonitor;

/// Per-job bookkeeping that only lives while the job is monitored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringEntry {
    pub run_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// When the most recent agent reached a terminal status.
    pub last_finished_at: Option<DateTime<Utc>>,
}

/// Collaborators the orchestrator reads from and writes to.
#[derive(Clone)]
pub struct OrchestratorParts {
    pub store: Arc<dyn JobRepository>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub monitor: Arc<dyn DeploymentMonitor>,
    pub previews: Arc<dyn PreviewResolver>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub policy: TerminationPolicy,
    pub preview_hosts: PreviewHosts,
    /// Upper bound for each external call.
    pub call_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ArenaConfig) -> Self {
        Self {
            policy: config.termination_policy(),
            preview_hosts: config.preview_hosts(),
            call_timeout: config.request_timeout(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub jobs_polled: usize,
    pub agents_updated: usize,
    pub converged: Vec<String>,
    /// Jobs dropped because they were completed or no longer stored.
    pub dropped: Vec<String>,
}

enum JobOutcome {
    Active {
        last_finished_at: Option<DateTime<Utc>>,
        agents_updated: usize,
    },
    Converged {
        agents_updated: usize,
    },
    Dropped,
}

#[derive(Debug, Default)]
struct AgentOutcome {
    updated: bool,
    finished: bool,
}

pub struct PollingOrchestrator {
    parts: OrchestratorParts,
    settings: OrchestratorSettings,
    active: Mutex<HashMap<String, MonitoringEntry>>,
}

impl PollingOrchestrator {
    pub fn new(parts: OrchestratorParts, settings: OrchestratorSettings) -> Self {
        Self {
            parts,
            settings,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start monitoring `job` from now on.
    pub async fn register(&self, job: &Job) {
        let entry = MonitoringEntry {
            run_ids: job.agents.iter().map(|agent| agent.run_id.clone()).collect(),
            started_at: self.parts.clock.now(),
            last_finished_at: None,
        };
        debug!(job_id = %job.id, agents = entry.run_ids.len(), "job registered for monitoring");
        self.active.lock().await.insert(job.id.clone(), entry);
    }

    pub async fn is_monitoring(&self, job_id: &str) -> bool {
        self.active.lock().await.contains_key(job_id)
    }

    pub async fn monitoring_entry(&self, job_id: &str) -> Option<MonitoringEntry> {
        self.active.lock().await.get(job_id).cloned()
    }

    /// Reconcile every active job once.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> TickSummary {
        let now = self.parts.clock.now();
        let snapshot: Vec<(String, MonitoringEntry)> = self
            .active
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        debug!(jobs = snapshot.len(), "tick started");

        let outcomes = join_all(
            snapshot
                .iter()
                .map(|(job_id, entry)| self.reconcile_job(job_id, entry, now)),
        )
        .await;

        let mut summary = TickSummary {
            jobs_polled: snapshot.len(),
            ..TickSummary::default()
        };
        let mut active = self.active.lock().await;
        for ((job_id, _), outcome) in snapshot.into_iter().zip(outcomes) {
            match outcome {
                JobOutcome::Active {
                    last_finished_at,
                    agents_updated,
                } => {
                    summary.agents_updated += agents_updated;
                    if let Some(entry) = active.get_mut(&job_id) {
                        entry.last_finished_at = last_finished_at;
                    }
                }
                JobOutcome::Converged { agents_updated } => {
                    summary.agents_updated += agents_updated;
                    active.remove(&job_id);
                    summary.converged.push(job_id);
                }
                JobOutcome::Dropped => {
                    active.remove(&job_id);
                    summary.dropped.push(job_id);
                }
            }
        }
        debug!(
            updated = summary.agents_updated,
            converged = summary.converged.len(),
            remaining = active.len(),
            "tick finished"
        );
        summary
    }

    #[instrument(skip(self, entry, now))]
    async fn reconcile_job(
        &self,
        job_id: &str,
        entry: &MonitoringEntry,
        now: DateTime<Utc>,
    ) -> JobOutcome {
        let store = &self.parts.store;
        let Some(job) = store.get_job(job_id).await else {
            debug!("job no longer stored");
            return JobOutcome::Dropped;
        };
        if job.status != JobStatus::Processing {
            debug!(status = %job.status, "job left processing, dropping from monitoring");
            return JobOutcome::Dropped;
        }

        let job = &job;
        let pending: Vec<&Agent> = entry
            .run_ids
            .iter()
            .filter_map(|run_id| job.agent_by_run_id(run_id))
            .filter(|agent| !agent.status.is_terminal() || awaits_preview(agent))
            .collect();
        let outcomes = join_all(pending.iter().map(|agent| async move {
            if agent.status.is_terminal() {
                self.retry_preview(job, agent).await
            } else {
                self.reconcile_agent(job, agent, now).await
            }
        }))
        .await;

        let agents_updated = outcomes.iter().filter(|outcome| outcome.updated).count();
        let last_finished_at = if outcomes.iter().any(|outcome| outcome.finished) {
            Some(now)
        } else {
            entry.last_finished_at
        };

        let Some(job) = store.get_job(job_id).await else {
            return JobOutcome::Dropped;
        };
        if job.status == JobStatus::Completed {
            return JobOutcome::Dropped;
        }
        let progress = JobProgress::from_agents(&job.agents, entry.started_at, last_finished_at);
        let Some(reason) = self.settings.policy.evaluate(&progress, now) else {
            return JobOutcome::Active {
                last_finished_at,
                agents_updated,
            };
        };

        if !store.update_job_status(job_id, JobStatus::ReviewNeeded).await {
            // Completed by a human between the read and the write.
            return JobOutcome::Dropped;
        }
        info!(
            reason = reason_label(reason),
            terminal = progress.terminal,
            ready = progress.ready,
            total = progress.total,
            "job converged, awaiting review"
        );
        self.parts.events.publish(ArenaEvent::JobConverged {
            job_id: job_id.to_string(),
        });
        JobOutcome::Converged { agents_updated }
    }

    #[instrument(
        skip(self, job, agent, now),
        fields(job_id = %job.id, agent_id = %agent.id, run_id = %agent.run_id)
    )]
    async fn reconcile_agent(&self, job: &Job, agent: &Agent, now: DateTime<Utc>) -> AgentOutcome {
        let run = match self
            .bounded("get run", self.parts.backend.get_run(&agent.run_id))
            .await
        {
            Ok(run) => run,
            Err(err) => {
                warn!(error = %err, "run fetch failed, retrying next tick");
                return AgentOutcome::default();
            }
        };

        let candidate = map_run_state(&run.state);
        let mut update = AgentUpdate::default();
        let mut deployment = None;
        let mut deployed_url = None;
        let mut check_failed = false;
        if candidate == AgentStatus::Pushing
            && let Some(repo) = &job.repository
        {
            match self
                .bounded("deployment check", self.parts.monitor.check(repo, &agent.branch))
                .await
            {
                Ok(check) => {
                    update.deployment = Some(DeploymentTracking {
                        workflow_run_id: check.workflow_run_id,
                        deployment_id: check.deployment_id,
                        last_checked: now,
                    });
                    deployment = Some(check.status);
                    deployed_url = check.preview_url;
                }
                Err(err) if err.is_configuration() => {
                    debug!(error = %err, "deployment checks disabled");
                    check_failed = true;
                }
                Err(err) => {
                    warn!(error = %err, "deployment check failed, retrying next tick");
                    check_failed = true;
                }
            }
        }

        // A failed check says nothing about the deployment: an agent already
        // past the execution phase keeps whatever status it had.
        let status = if check_failed
            && matches!(agent.status, AgentStatus::Pushing | AgentStatus::Deploying)
        {
            agent.status
        } else {
            merge_status(candidate, deployment)
        };
        if status != agent.status {
            update.status = Some(status);
        }
        if status == AgentStatus::Ready
            && let Some(url) = deployed_url
        {
            self.resolve_preview(agent, url, &mut update).await;
        }
        if let Some(link) = run.session_link
            && agent.session_link.as_ref() != Some(&link)
        {
            update.session_link = Some(link);
        }
        if let Some(message) = run.status_message
            && !message.trim().is_empty()
            && agent.logs.last_progress() != Some(message.as_str())
        {
            update.progress = Some(message);
        }

        let visible = update.status.is_some()
            || update.preview_url.is_some()
            || update.dashboard_url.is_some()
            || update.session_link.is_some()
            || update.progress.is_some();
        if update.is_empty() {
            return AgentOutcome::default();
        }
        let applied = self
            .parts
            .store
            .update_agent_unless_completed(&job.id, &agent.run_id, update)
            .await;
        if !applied || !visible {
            return AgentOutcome::default();
        }

        if status != agent.status {
            info!(from = %agent.status, to = %status, "agent status changed");
        }
        self.parts.events.publish(ArenaEvent::AgentUpdated {
            job_id: job.id.clone(),
            agent_id: agent.id.clone(),
        });
        AgentOutcome {
            updated: true,
            finished: status != agent.status && status.is_terminal(),
        }
    }

    /// Retry dashboard resolution for a ready agent still missing its
    /// preview. The status is left alone.
    #[instrument(skip(self, job, agent), fields(job_id = %job.id, agent_id = %agent.id))]
    async fn retry_preview(&self, job: &Job, agent: &Agent) -> AgentOutcome {
        let Some(dashboard_url) = agent.dashboard_url.clone() else {
            return AgentOutcome::default();
        };
        let mut update = AgentUpdate::default();
        self.resolve_preview(agent, dashboard_url, &mut update).await;
        if update.preview_url.is_none() {
            return AgentOutcome::default();
        }
        let applied = self
            .parts
            .store
            .update_agent_unless_completed(&job.id, &agent.run_id, update)
            .await;
        if !applied {
            return AgentOutcome::default();
        }
        info!("preview resolved");
        self.parts.events.publish(ArenaEvent::AgentUpdated {
            job_id: job.id.clone(),
            agent_id: agent.id.clone(),
        });
        AgentOutcome {
            updated: true,
            finished: false,
        }
    }

    /// Store a deployed address: dashboard pages are kept as the dashboard
    /// address and resolved to a canonical preview.
    async fn resolve_preview(&self, agent: &Agent, url: String, update: &mut AgentUpdate) {
        match self.settings.preview_hosts.classify(&url) {
            PreviewKind::Dashboard => {
                if agent.dashboard_url.as_ref() != Some(&url) {
                    update.dashboard_url = Some(url.clone());
                }
                let resolved = timeout(
                    self.settings.call_timeout,
                    self.parts.previews.resolve(&url),
                )
                .await
                .ok()
                .flatten();
                match resolved {
                    Some(preview) if agent.preview_url.as_ref() != Some(&preview) => {
                        update.preview_url = Some(preview);
                    }
                    Some(_) => {}
                    None => debug!(dashboard_url = %url, "preview could not be resolved"),
                }
            }
            PreviewKind::Direct | PreviewKind::Other => {
                if agent.preview_url.as_ref() != Some(&url) {
                    update.preview_url = Some(url);
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = ArenaResult<T>>,
    ) -> ArenaResult<T> {
        match timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ArenaError::Fetch(format!(
                "{operation} timed out after {:?}",
                self.settings.call_timeout
            ))),
        }
    }

    /// Run [`PollingOrchestrator::tick`] every `period` until the returned
    /// handle is shut down. A tick in progress always runs to completion.
    pub fn start(self: Arc<Self>, period: Duration) -> OrchestratorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs_f64(), "orchestrator started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("orchestrator stopped");
        });
        OrchestratorHandle {
            shutdown_tx,
            task,
        }
    }
}

/// Owner of the background reconciliation task.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Stop ticking and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "orchestrator task ended abnormally");
        }
    }
}

/// Ready, with a dashboard address that has not resolved to a preview yet.
fn awaits_preview(agent: &Agent) -> bool {
    agent.status == AgentStatus::Ready
        && agent.dashboard_url.is_some()
        && agent.preview_url.is_none()
}

fn reason_label(reason: ConvergenceReason) -> &'static str {
    match reason {
        ConvergenceReason::AllTerminal => "all_terminal",
        ConvergenceReason::MaxWait => "max_wait",
        ConvergenceReason::IdleAfterMajority => "idle_after_majority",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeploymentStatus;
    use crate::io::store::InMemoryJobStore;
    use crate::test_support::{
        ManualClock, ScriptedBackend, ScriptedMonitor, StaticPreviewResolver, agent_with_status,
        at, job_with_agents, preview_hosts,
    };

    struct Harness {
        store: Arc<InMemoryJobStore>,
        backend: Arc<ScriptedBackend>,
        monitor: Arc<ScriptedMonitor>,
        previews: Arc<StaticPreviewResolver>,
        orchestrator: PollingOrchestrator,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let backend = Arc::new(ScriptedBackend::new());
        let monitor = Arc::new(ScriptedMonitor::new());
        let previews = Arc::new(StaticPreviewResolver::new());
        let parts = OrchestratorParts {
            store: store.clone(),
            backend: backend.clone(),
            monitor: monitor.clone(),
            previews: previews.clone(),
            clock: Arc::new(ManualClock::new(at(0))),
            events: EventBus::new(),
        };
        let settings = OrchestratorSettings {
            policy: TerminationPolicy::default(),
            preview_hosts: preview_hosts(),
            call_timeout: Duration::from_millis(200),
        };
        Harness {
            store,
            backend,
            monitor,
            previews,
            orchestrator: PollingOrchestrator::new(parts, settings),
        }
    }

    async fn seed(h: &Harness, agents: Vec<Agent>) -> Job {
        let job = h
            .store
            .create_job(job_with_agents("job", agents))
            .await
            .expect("create job");
        h.orchestrator.register(&job).await;
        job
    }

    #[tokio::test]
    async fn dashboard_preview_is_resolved_when_ready() {
        let h = harness();
        let agent = agent_with_status(1, "run-1", AgentStatus::Deploying);
        let branch = agent.branch.clone();
        seed(&h, vec![agent, agent_with_status(2, "run-2", AgentStatus::Developing)]).await;
        h.backend.set_state("run-1", "succeeded");
        h.backend.set_state("run-2", "in_progress");
        h.monitor.set(
            &branch,
            DeploymentStatus::Success,
            Some("https://vercel.com/acme/web/dpl_123"),
        );
        h.previews
            .insert("https://vercel.com/acme/web/dpl_123", "https://web-abc.vercel.app");

        let summary = h.orchestrator.tick().await;

        assert_eq!(summary.agents_updated, 1);
        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Ready);
        assert_eq!(
            agent.dashboard_url.as_deref(),
            Some("https://vercel.com/acme/web/dpl_123")
        );
        assert_eq!(agent.preview_url.as_deref(), Some("https://web-abc.vercel.app"));
        assert_eq!(agent.deployment.map(|d| d.last_checked), Some(at(0)));
    }

    #[tokio::test]
    async fn unresolvable_dashboard_leaves_preview_empty() {
        let h = harness();
        let agent = agent_with_status(1, "run-1", AgentStatus::Pushing);
        let branch = agent.branch.clone();
        seed(&h, vec![agent]).await;
        h.backend.set_state("run-1", "succeeded");
        h.monitor.set(
            &branch,
            DeploymentStatus::Success,
            Some("https://vercel.com/acme/web/dpl_404"),
        );

        h.orchestrator.tick().await;

        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Ready);
        assert_eq!(agent.preview_url, None);
        assert_eq!(h.previews.calls(), vec!["https://vercel.com/acme/web/dpl_404"]);
    }

    #[tokio::test]
    async fn missing_code_host_credentials_keep_agent_pushing() {
        let h = harness();
        let agent = agent_with_status(1, "run-1", AgentStatus::Developing);
        let branch = agent.branch.clone();
        seed(&h, vec![agent]).await;
        h.backend.set_state("run-1", "succeeded");
        h.monitor.fail(&branch, true);

        h.orchestrator.tick().await;

        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Pushing);
        assert_eq!(agent.deployment, None);
        assert!(h.orchestrator.is_monitoring("job").await);
    }

    #[tokio::test]
    async fn job_without_repository_skips_deployment_checks() {
        let h = harness();
        let mut job = job_with_agents("job", vec![agent_with_status(1, "run-1", AgentStatus::Developing)]);
        job.repository = None;
        let job = h.store.create_job(job).await.expect("create");
        h.orchestrator.register(&job).await;
        h.backend.set_state("run-1", "succeeded");

        h.orchestrator.tick().await;

        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Pushing);
        assert_eq!(h.monitor.calls(&agent.branch), 0);
    }

    #[tokio::test]
    async fn deploying_agent_regresses_when_record_disappears() {
        let h = harness();
        let agent = agent_with_status(1, "run-1", AgentStatus::Pushing);
        let branch = agent.branch.clone();
        seed(&h, vec![agent]).await;
        h.backend.set_state("run-1", "succeeded");
        h.monitor.set(&branch, DeploymentStatus::Pending, None);
        h.orchestrator.tick().await;
        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Deploying);

        h.monitor.set(&branch, DeploymentStatus::NotFound, None);
        h.orchestrator.tick().await;

        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Pushing);
        assert_eq!(
            agent.logs.lines(),
            &["pushing -> deploying".to_string(), "deploying -> pushing".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_deployment_check_keeps_deploying_agent() {
        let h = harness();
        let agent = agent_with_status(1, "run-1", AgentStatus::Pushing);
        let branch = agent.branch.clone();
        seed(&h, vec![agent]).await;
        h.backend.set_state("run-1", "succeeded");
        h.monitor.set(&branch, DeploymentStatus::Pending, None);
        h.orchestrator.tick().await;

        h.monitor.fail(&branch, false);
        let summary = h.orchestrator.tick().await;
        h.monitor.fail(&branch, true);
        h.orchestrator.tick().await;

        assert_eq!(summary.agents_updated, 0);
        assert_eq!(h.monitor.calls(&branch), 3);
        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Deploying);
        assert_eq!(agent.logs.lines(), &["pushing -> deploying".to_string()]);
        assert!(h.orchestrator.is_monitoring("job").await);
    }

    #[tokio::test]
    async fn dashboard_preview_is_retried_until_it_resolves() {
        let h = harness();
        let dashboard = "https://vercel.com/acme/web/dpl_1";
        let agent = agent_with_status(1, "run-1", AgentStatus::Pushing);
        let branch = agent.branch.clone();
        seed(&h, vec![agent, agent_with_status(2, "run-2", AgentStatus::Developing)]).await;
        h.backend.set_state("run-1", "succeeded");
        h.backend.set_state("run-2", "in_progress");
        h.monitor.set(&branch, DeploymentStatus::Success, Some(dashboard));
        h.orchestrator.tick().await;
        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Ready);
        assert_eq!(agent.preview_url, None);

        h.previews.insert(dashboard, "https://web-1.vercel.app");
        let summary = h.orchestrator.tick().await;
        h.orchestrator.tick().await;

        assert_eq!(summary.agents_updated, 1);
        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(agent.status, AgentStatus::Ready);
        assert_eq!(agent.preview_url.as_deref(), Some("https://web-1.vercel.app"));
        assert_eq!(h.previews.calls(), vec![dashboard, dashboard]);
        assert_eq!(h.monitor.calls(&branch), 1);
    }

    #[tokio::test]
    async fn hanging_run_does_not_block_siblings() {
        let h = harness();
        seed(
            &h,
            vec![
                agent_with_status(1, "run-1", AgentStatus::Initializing),
                agent_with_status(2, "run-2", AgentStatus::Initializing),
            ],
        )
        .await;
        h.backend.set_state("run-1", "in_progress");
        h.backend.set_state("run-2", "in_progress");
        h.backend.hang_run("run-1");

        let summary = h.orchestrator.tick().await;

        assert_eq!(summary.agents_updated, 1);
        let (_, stuck) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        let (_, moving) = h.store.get_agent_by_run_id("run-2").await.expect("agent");
        assert_eq!(stuck.status, AgentStatus::Initializing);
        assert_eq!(moving.status, AgentStatus::Developing);
    }

    #[tokio::test]
    async fn progress_message_is_a_live_line() {
        let h = harness();
        seed(&h, vec![agent_with_status(1, "run-1", AgentStatus::Initializing)]).await;
        let mut run = crate::test_support::snapshot("in_progress");
        run.status_message = Some("reading code".to_string());
        h.backend.set_snapshot("run-1", run.clone());
        h.orchestrator.tick().await;

        run.status_message = Some("writing tests".to_string());
        h.backend.set_snapshot("run-1", run.clone());
        h.orchestrator.tick().await;
        let summary = h.orchestrator.tick().await;

        assert_eq!(summary.agents_updated, 0);
        let (_, agent) = h.store.get_agent_by_run_id("run-1").await.expect("agent");
        assert_eq!(
            agent.logs.lines(),
            &[
                "initializing -> developing".to_string(),
                "writing tests".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let h = harness();
        seed(&h, vec![agent_with_status(1, "run-1", AgentStatus::Initializing)]).await;
        h.backend.set_state("run-1", "in_progress");
        let orchestrator = Arc::new(h.orchestrator);

        let handle = orchestrator.clone().start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        let calls = h.backend.get_run_calls("run-1");
        assert!(calls >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.backend.get_run_calls("run-1"), calls);
    }
}
