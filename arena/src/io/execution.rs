//! Execution backend abstraction for agent runs.
//!
//! The [`ExecutionBackend`] trait decouples the spawner and the orchestrator
//! from the remote service that actually runs agents. Tests use scripted
//! backends that return predetermined run states without any network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::RemoteRunState;
use crate::error::{ArenaError, ArenaResult};
use crate::io::config::ENV_EXECUTION_API_KEY;
use crate::io::http::{build_client, endpoint, parse_base, request_json};

/// Parameters for starting one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Task instructions, including the branch to push to.
    pub prompt: String,
    pub title: String,
    pub model: String,
}

/// Backend response to a run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub state: RemoteRunState,
    pub session_link: Option<String>,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub state: RemoteRunState,
    pub session_link: Option<String>,
    pub status_message: Option<String>,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run_agent(&self, request: &RunRequest) -> ArenaResult<RunHandle>;

    async fn get_run(&self, run_id: &str) -> ArenaResult<RunSnapshot>;
}

#[derive(Debug, Serialize)]
struct CreateRunBody<'a> {
    prompt: &'a str,
    title: &'a str,
    config: ModelConfig<'a>,
}

#[derive(Debug, Serialize)]
struct ModelConfig<'a> {
    model_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run_id: String,
    state: String,
    #[serde(default)]
    session_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetRunResponse {
    state: String,
    #[serde(default)]
    session_link: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
}

/// [`ExecutionBackend`] speaking the agent service's JSON API.
#[derive(Debug, Clone)]
pub struct HttpExecutionBackend {
    api_url: Url,
    api_key: Option<String>,
    client: Client,
}

impl HttpExecutionBackend {
    pub fn new(api_url: &str, api_key: Option<String>, timeout: Duration) -> ArenaResult<Self> {
        Ok(Self {
            api_url: parse_base("execution backend", api_url)?,
            api_key,
            client: build_client(timeout)?,
        })
    }

    fn api_key(&self) -> ArenaResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ArenaError::Configuration(format!(
                "{ENV_EXECUTION_API_KEY} is not set. Export an API key for the execution backend."
            ))
        })
    }
}

#[async_trait]
impl ExecutionBackend for HttpExecutionBackend {
    #[instrument(skip_all, fields(title = %request.title, model = %request.model))]
    async fn run_agent(&self, request: &RunRequest) -> ArenaResult<RunHandle> {
        let key = self.api_key()?;
        let body = CreateRunBody {
            prompt: &request.prompt,
            title: &request.title,
            config: ModelConfig {
                model_id: &request.model,
            },
        };
        let builder = self
            .client
            .post(endpoint(&self.api_url, &["runs"]))
            .bearer_auth(key)
            .json(&body);
        let response: CreateRunResponse = request_json("execution backend", builder).await?;
        debug!(run_id = %response.run_id, state = %response.state, "run created");
        Ok(RunHandle {
            run_id: response.run_id,
            state: RemoteRunState::parse(&response.state),
            session_link: response.session_link,
        })
    }

    async fn get_run(&self, run_id: &str) -> ArenaResult<RunSnapshot> {
        let key = self.api_key()?;
        let builder = self
            .client
            .get(endpoint(&self.api_url, &["runs", run_id]))
            .bearer_auth(key);
        let response: GetRunResponse = request_json("execution backend", builder).await?;
        Ok(RunSnapshot {
            state: RemoteRunState::parse(&response.state),
            session_link: response.session_link,
            status_message: response
                .status_message
                .map(|message| message.trim().to_string())
                .filter(|message| !message.is_empty()),
        })
    }
}
