//! Arena server: job API, change stream and the polling orchestrator.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arena::events::EventBus;
use arena::io::clock::SystemClock;
use arena::io::code_host::GitHubCodeHost;
use arena::io::config::{Credentials, load_config};
use arena::io::execution::HttpExecutionBackend;
use arena::io::preview::VercelPreviewResolver;
use arena::io::store::InMemoryJobStore;
use arena::monitor::FallbackDeploymentMonitor;
use arena::orchestrator::{OrchestratorParts, OrchestratorSettings, PollingOrchestrator};
use arena::spawn::JobSpawner;
use clap::Parser;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "arena-server")]
#[command(about = "Spawn competing agent runs and track them until review")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Config file (defaults apply when it does not exist)
    #[arg(long, default_value = "arena.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    arena::logging::init("arena=info,arena_server=info");

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let credentials = Credentials::from_env();
    let timeout = config.request_timeout();
    info!(config = %args.config.display(), poll_secs = config.poll_interval_secs, "starting arena-server");

    let backend = Arc::new(
        HttpExecutionBackend::new(
            &config.execution.api_url,
            credentials.execution_api_key,
            timeout,
        )
        .context("build execution backend client")?,
    );
    let code_host = GitHubCodeHost::new(&config.github.api_url, credentials.github_token, timeout)
        .context("build code host client")?;
    let previews = VercelPreviewResolver::new(&config.deploy.api_url, credentials.deploy_token, timeout)
        .context("build deployment host client")?;

    let store = Arc::new(InMemoryJobStore::new());
    let clock = Arc::new(SystemClock);
    let events = EventBus::new();

    let orchestrator = Arc::new(PollingOrchestrator::new(
        OrchestratorParts {
            store: store.clone(),
            backend: backend.clone(),
            monitor: Arc::new(FallbackDeploymentMonitor::new(
                code_host,
                config.preview_hosts(),
            )),
            previews: Arc::new(previews),
            clock: clock.clone(),
            events: events.clone(),
        },
        OrchestratorSettings::from_config(&config),
    ));
    let spawner = JobSpawner::new(
        store.clone(),
        backend,
        orchestrator.clone(),
        clock,
        events.clone(),
    )
    .with_default_model(config.execution.default_model.clone())
    .with_call_timeout(timeout);

    let orchestrator_handle = orchestrator.start(config.poll_interval());

    let state = AppState::new(store, spawner, events, config.server.public_url.clone());
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator_handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed, shutting down");
    }
    info!("shutdown requested");
}
