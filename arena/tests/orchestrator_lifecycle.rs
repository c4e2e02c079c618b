//! Tick-level scenarios for the polling orchestrator.
//!
//! Each test seeds the store with one job, scripts the execution backend and
//! the deployment monitor, then drives `tick()` with a manual clock so the
//! termination windows can be crossed to the second.

use std::sync::Arc;
use std::time::Duration;

use arena::core::termination::TerminationPolicy;
use arena::core::types::{AgentStatus, DeploymentStatus, Job, JobStatus};
use arena::events::{ArenaEvent, EventBus};
use arena::io::store::{InMemoryJobStore, JobRepository};
use arena::orchestrator::{OrchestratorParts, OrchestratorSettings, PollingOrchestrator};
use arena::test_support::{
    ManualClock, ScriptedBackend, ScriptedMonitor, StaticPreviewResolver, agent_with_status, at,
    job_with_agents, preview_hosts,
};

struct World {
    store: Arc<InMemoryJobStore>,
    backend: Arc<ScriptedBackend>,
    monitor: Arc<ScriptedMonitor>,
    clock: Arc<ManualClock>,
    events: EventBus,
    orchestrator: PollingOrchestrator,
}

impl World {
    fn new() -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let backend = Arc::new(ScriptedBackend::new());
        let monitor = Arc::new(ScriptedMonitor::new());
        let clock = Arc::new(ManualClock::new(at(0)));
        let events = EventBus::new();
        let parts = OrchestratorParts {
            store: store.clone(),
            backend: backend.clone(),
            monitor: monitor.clone(),
            previews: Arc::new(StaticPreviewResolver::new()),
            clock: clock.clone(),
            events: events.clone(),
        };
        let settings = OrchestratorSettings {
            policy: TerminationPolicy::default(),
            preview_hosts: preview_hosts(),
            call_timeout: Duration::from_millis(200),
        };
        Self {
            store,
            backend,
            monitor,
            clock,
            events,
            orchestrator: PollingOrchestrator::new(parts, settings),
        }
    }

    /// Store and register a job with `n` freshly spawned agents.
    async fn seed(&self, n: u32) -> Job {
        let agents = (1..=n)
            .map(|ordinal| {
                agent_with_status(ordinal, &format!("run-{ordinal}"), AgentStatus::Initializing)
            })
            .collect();
        let job = self
            .store
            .create_job(job_with_agents("job", agents))
            .await
            .expect("create job");
        for agent in &job.agents {
            self.backend.set_state(&agent.run_id, "in_progress");
        }
        self.orchestrator.register(&job).await;
        job
    }

    /// Script agent `ordinal` as executed and deployed with a direct preview.
    fn deploy(&self, job: &Job, ordinal: usize) {
        let agent = &job.agents[ordinal - 1];
        self.backend.set_state(&agent.run_id, "succeeded");
        self.monitor.set(
            &agent.branch,
            DeploymentStatus::Success,
            Some(format!("https://web-{}.vercel.app", agent.id).as_str()),
        );
    }

    async fn job_status(&self) -> JobStatus {
        self.store.get_job("job").await.expect("job").status
    }

    async fn tick_at(&self, secs: i64) {
        self.clock.set(at(secs));
        self.orchestrator.tick().await;
    }
}

#[tokio::test]
async fn all_terminal_converges_in_the_same_tick() {
    let world = World::new();
    let job = world.seed(3).await;
    let mut events = world.events.subscribe();
    world.tick_at(5).await;
    assert_eq!(world.job_status().await, JobStatus::Processing);

    world.deploy(&job, 1);
    world.backend.set_state("run-2", "failed");
    world.backend.set_state("run-3", "succeeded");
    world
        .monitor
        .set(&job.agents[2].branch, DeploymentStatus::Failure, None);
    world.tick_at(15).await;

    assert_eq!(world.job_status().await, JobStatus::ReviewNeeded);
    assert!(!world.orchestrator.is_monitoring("job").await);
    let stored = world.store.get_job("job").await.expect("job");
    let statuses: Vec<AgentStatus> = stored.agents.iter().map(|agent| agent.status).collect();
    assert_eq!(
        statuses,
        vec![
            AgentStatus::Ready,
            AgentStatus::Failed,
            AgentStatus::DeploymentFailed
        ]
    );

    let mut converged = 0;
    while let Ok(event) = events.try_recv() {
        if event == (ArenaEvent::JobConverged {
            job_id: "job".to_string(),
        }) {
            converged += 1;
        }
    }
    assert_eq!(converged, 1);
}

#[tokio::test]
async fn every_agent_failing_still_hands_off_for_review() {
    let world = World::new();
    world.seed(2).await;
    world.backend.set_state("run-1", "failed");
    world.backend.set_state("run-2", "cancelled");

    world.tick_at(1).await;

    assert_eq!(world.job_status().await, JobStatus::ReviewNeeded);
}

#[tokio::test]
async fn idle_window_after_majority_converges_only_after_sixty_seconds() {
    let world = World::new();
    let job = world.seed(3).await;

    world.deploy(&job, 1);
    world.tick_at(0).await;
    world.deploy(&job, 2);
    world.tick_at(30).await;

    let entry = world
        .orchestrator
        .monitoring_entry("job")
        .await
        .expect("still monitored");
    assert_eq!(entry.last_finished_at, Some(at(30)));

    world.tick_at(89).await;
    assert_eq!(world.job_status().await, JobStatus::Processing);
    assert!(world.orchestrator.is_monitoring("job").await);

    world.tick_at(91).await;
    assert_eq!(world.job_status().await, JobStatus::ReviewNeeded);
    let straggler = world.store.get_job("job").await.expect("job").agents[2].status;
    assert_eq!(straggler, AgentStatus::Developing);
}

#[tokio::test]
async fn max_wait_without_a_ready_agent_keeps_polling() {
    let world = World::new();
    world.seed(3).await;

    world.tick_at(10).await;
    world.tick_at(1800).await;
    world.tick_at(3600).await;

    assert_eq!(world.job_status().await, JobStatus::Processing);
    assert!(world.orchestrator.is_monitoring("job").await);
}

#[tokio::test]
async fn max_wait_forces_review_once_something_is_ready() {
    let world = World::new();
    let job = world.seed(3).await;

    world.deploy(&job, 1);
    world.tick_at(10).await;
    // One terminal agent out of three is no majority, so the idle window
    // never applies.
    world.tick_at(1000).await;
    world.tick_at(1799).await;
    assert_eq!(world.job_status().await, JobStatus::Processing);

    world.tick_at(1800).await;
    assert_eq!(world.job_status().await, JobStatus::ReviewNeeded);
}

#[tokio::test]
async fn fetch_failure_is_isolated_to_one_agent() {
    let world = World::new();
    world.seed(2).await;
    world.backend.fail_run("run-1");
    world.backend.set_state("run-2", "succeeded");

    world.tick_at(1).await;

    let job = world.store.get_job("job").await.expect("job");
    assert_eq!(job.agents[0].status, AgentStatus::Initializing);
    assert_eq!(job.agents[1].status, AgentStatus::Pushing);

    world.backend.recover("run-1");
    world.tick_at(11).await;

    let job = world.store.get_job("job").await.expect("job");
    assert_eq!(job.agents[0].status, AgentStatus::Developing);
}

#[tokio::test]
async fn repeated_polls_of_the_same_state_change_nothing() {
    let world = World::new();
    world.seed(2).await;

    world.tick_at(1).await;
    let first = world.store.get_job("job").await.expect("job");

    for secs in [11, 21, 31] {
        world.clock.set(at(secs));
        let summary = world.orchestrator.tick().await;
        assert_eq!(summary.agents_updated, 0);
    }

    let later = world.store.get_job("job").await.expect("job");
    assert_eq!(first.agents, later.agents);
    assert_eq!(
        later.agents[0].logs.lines(),
        &["initializing -> developing".to_string()]
    );
}

#[tokio::test]
async fn terminal_agents_are_not_polled_again() {
    let world = World::new();
    let job = world.seed(2).await;
    world.deploy(&job, 1);
    world.tick_at(1).await;
    let calls = world.backend.get_run_calls("run-1");

    // The backend now reports something else; the ready agent must not flap.
    world.backend.set_state("run-1", "failed");
    world.tick_at(11).await;
    world.tick_at(21).await;

    assert_eq!(world.backend.get_run_calls("run-1"), calls);
    let job = world.store.get_job("job").await.expect("job");
    assert_eq!(job.agents[0].status, AgentStatus::Ready);
    assert_eq!(
        job.agents[0].preview_url.as_deref(),
        Some("https://web-agent-1.vercel.app")
    );
}

#[tokio::test]
async fn completed_job_is_never_resurrected() {
    let world = World::new();
    let job = world.seed(2).await;
    world.deploy(&job, 1);
    world.tick_at(1).await;

    world
        .store
        .select_winners("job", &["agent-1".to_string()])
        .await
        .expect("select winner");
    world.backend.set_state("run-2", "succeeded");

    let summary = world.orchestrator.tick().await;

    assert_eq!(summary.dropped, vec!["job".to_string()]);
    assert!(!world.orchestrator.is_monitoring("job").await);
    let job = world.store.get_job("job").await.expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.winners, vec!["agent-1".to_string()]);
    assert_eq!(job.agents[1].status, AgentStatus::Developing);
}

#[tokio::test]
async fn vanished_job_is_dropped_from_monitoring() {
    let world = World::new();
    let job = job_with_agents(
        "ghost",
        vec![agent_with_status(1, "run-9", AgentStatus::Initializing)],
    );
    world.orchestrator.register(&job).await;

    let summary = world.orchestrator.tick().await;

    assert_eq!(summary.dropped, vec!["ghost".to_string()]);
    assert!(!world.orchestrator.is_monitoring("ghost").await);
}
