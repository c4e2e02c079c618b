//! Job spawning against a scripted execution backend.

use std::sync::Arc;
use std::time::Duration;

use arena::core::termination::TerminationPolicy;
use arena::core::types::{AgentStatus, JobStatus, RepoCoordinate};
use arena::error::ArenaError;
use arena::events::{ArenaEvent, EventBus};
use arena::io::config::ExecutionConfig;
use arena::io::store::{InMemoryJobStore, JobRepository};
use arena::orchestrator::{OrchestratorParts, OrchestratorSettings, PollingOrchestrator};
use arena::spawn::{AgentSlot, JobSpawner, SpawnRequest};
use arena::test_support::{
    ManualClock, ScriptedBackend, ScriptedMonitor, StaticPreviewResolver, at, preview_hosts,
};

struct World {
    store: Arc<InMemoryJobStore>,
    backend: Arc<ScriptedBackend>,
    events: EventBus,
    orchestrator: Arc<PollingOrchestrator>,
    spawner: JobSpawner,
}

fn world() -> World {
    let store = Arc::new(InMemoryJobStore::new());
    let backend = Arc::new(ScriptedBackend::new());
    let clock = Arc::new(ManualClock::new(at(42)));
    let events = EventBus::new();
    let orchestrator = Arc::new(PollingOrchestrator::new(
        OrchestratorParts {
            store: store.clone(),
            backend: backend.clone(),
            monitor: Arc::new(ScriptedMonitor::new()),
            previews: Arc::new(StaticPreviewResolver::new()),
            clock: clock.clone(),
            events: events.clone(),
        },
        OrchestratorSettings {
            policy: TerminationPolicy::default(),
            preview_hosts: preview_hosts(),
            call_timeout: Duration::from_millis(200),
        },
    ));
    let spawner = JobSpawner::new(
        store.clone(),
        backend.clone(),
        orchestrator.clone(),
        clock,
        events.clone(),
    )
    .with_default_model("baseline")
    .with_call_timeout(Duration::from_millis(200));
    World {
        store,
        backend,
        events,
        orchestrator,
        spawner,
    }
}

fn request(slots: Vec<AgentSlot>) -> SpawnRequest {
    SpawnRequest {
        issue_id: "ENG-12".to_string(),
        title: "Add dark mode".to_string(),
        description: "Toggle in the header.".to_string(),
        repository: Some(RepoCoordinate::new("acme", "web")),
        agents: slots,
    }
}

fn slot(model: Option<&str>, count: u32) -> AgentSlot {
    AgentSlot {
        model: model.map(str::to_string),
        count,
    }
}

#[tokio::test]
async fn spawns_one_agent_per_slot_unit_with_deterministic_branches() {
    let world = world();
    let mut events = world.events.subscribe();

    let job = world
        .spawner
        .spawn(request(vec![slot(Some("fast"), 2), slot(None, 1)]))
        .await
        .expect("spawn");

    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.created_at, at(42));
    let ids: Vec<&str> = job.agents.iter().map(|agent| agent.id.as_str()).collect();
    assert_eq!(ids, vec!["agent-1", "agent-2", "agent-3"]);
    for (index, agent) in job.agents.iter().enumerate() {
        assert_eq!(agent.branch, format!("arena/{}/agent-{}", job.id, index + 1));
        assert_eq!(agent.run_id, format!("run-{}", index + 1));
        assert_eq!(agent.status, AgentStatus::Initializing);
        assert!(agent.session_link.is_some());
    }
    let models: Vec<&str> = job.agents.iter().map(|agent| agent.model.as_str()).collect();
    assert_eq!(models, vec!["fast", "fast", "baseline"]);

    let requests = world.backend.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].prompt.contains(&format!("arena/{}/agent-2", job.id)));
    assert!(requests[1].prompt.contains("Add dark mode"));

    assert!(world.orchestrator.is_monitoring(&job.id).await);
    let entry = world
        .orchestrator
        .monitoring_entry(&job.id)
        .await
        .expect("entry");
    assert_eq!(entry.started_at, at(42));
    assert_eq!(entry.last_finished_at, None);
    assert_eq!(entry.run_ids, vec!["run-1", "run-2", "run-3"]);

    assert_eq!(world.store.get_job(&job.id).await, Some(job.clone()));
    assert_eq!(
        events.try_recv().expect("event"),
        ArenaEvent::JobCreated {
            job_id: job.id.clone()
        }
    );
}

#[tokio::test]
async fn failed_run_request_skips_that_agent_only() {
    let world = world();
    world.backend.fail_spawn(2);

    let job = world
        .spawner
        .spawn(request(vec![slot(None, 3)]))
        .await
        .expect("spawn");

    let ids: Vec<&str> = job.agents.iter().map(|agent| agent.id.as_str()).collect();
    assert_eq!(ids, vec!["agent-1", "agent-3"]);
    assert_eq!(job.agents[1].branch, format!("arena/{}/agent-3", job.id));
}

#[tokio::test]
async fn missing_credentials_fail_the_spawn() {
    let world = world();
    world.backend.without_credentials();

    let err = world
        .spawner
        .spawn(request(vec![slot(None, 2)]))
        .await
        .unwrap_err();

    assert!(matches!(err, ArenaError::Configuration(_)));
    assert!(world.store.list_jobs().await.is_empty());
}

#[tokio::test]
async fn no_started_agent_is_an_error() {
    let world = world();
    world.backend.fail_spawn(1);

    let err = world
        .spawner
        .spawn(request(vec![slot(None, 1)]))
        .await
        .unwrap_err();

    assert!(matches!(err, ArenaError::Fetch(_)));
    assert!(world.store.list_jobs().await.is_empty());
}

#[tokio::test]
async fn empty_request_is_rejected() {
    let world = world();

    let err = world
        .spawner
        .spawn(request(vec![slot(Some("fast"), 0)]))
        .await
        .unwrap_err();

    assert!(matches!(err, ArenaError::InvalidRequest(_)));
    assert!(world.backend.requests().is_empty());
}

#[tokio::test]
async fn job_ids_are_unique_across_spawns() {
    let world = world();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..20 {
        let job = world
            .spawner
            .spawn(request(vec![slot(None, 1)]))
            .await
            .expect("spawn");
        assert!(ids.insert(job.id));
    }
}

#[tokio::test]
async fn unconfigured_spawner_uses_the_config_default_model() {
    let world = world();
    let spawner = JobSpawner::new(
        world.store.clone(),
        world.backend.clone(),
        world.orchestrator.clone(),
        Arc::new(ManualClock::new(at(0))),
        world.events.clone(),
    );

    let job = spawner
        .spawn(request(vec![slot(None, 1), slot(Some("  "), 1)]))
        .await
        .expect("spawn");

    let expected = ExecutionConfig::default().default_model;
    assert!(job.agents.iter().all(|agent| agent.model == expected));
}
