//! HTTP route handlers for the job API.

use arena::core::types::{Job, JobSummary, RepoCoordinate, Verification};
use arena::error::ArenaError;
use arena::events::ArenaEvent;
use arena::spawn::{AgentSlot, SpawnRequest};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::sse;
use crate::state::AppState;

/// Full application: `/api` routes, the event stream and CORS.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state)
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/select", post(select_winners))
        .route(
            "/jobs/{job_id}/agents/{agent_id}/verification",
            post(record_verification),
        )
}

/// Library error rendered as `{"error": "..."}` with a matching status.
pub struct ApiError(ArenaError);

impl From<ArenaError> for ApiError {
    fn from(err: ArenaError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ArenaError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            ArenaError::Fetch(_) => StatusCode::BAD_GATEWAY,
            ArenaError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ArenaError::NotFound(_) => StatusCode::NOT_FOUND,
            ArenaError::InvalidSelection(_) | ArenaError::Conflict(_) => StatusCode::CONFLICT,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct CreateJobBody {
    #[serde(default)]
    issue_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    repository: Option<RepoCoordinate>,
    agents: Vec<AgentSlotBody>,
}

#[derive(Debug, Deserialize)]
struct AgentSlotBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "one")]
    count: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    job_id: String,
    url: String,
    agents: Vec<SpawnedAgent>,
}

#[derive(Debug, Serialize)]
struct SpawnedAgent {
    agent_id: String,
    branch: String,
    session_link: Option<String>,
}

/// POST /api/jobs - spawn a job with one run per requested agent.
async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let request = SpawnRequest {
        issue_id: body.issue_id,
        title: body.title,
        description: body.description,
        repository: body.repository,
        agents: body
            .agents
            .into_iter()
            .map(|slot| AgentSlot {
                model: slot.model,
                count: slot.count,
            })
            .collect(),
    };
    let job = state.spawner.spawn(request).await?;
    let response = CreateJobResponse {
        url: state.job_url(&job.id),
        agents: job
            .agents
            .iter()
            .map(|agent| SpawnedAgent {
                agent_id: agent.id.clone(),
                branch: agent.branch.clone(),
                session_link: agent.session_link.clone(),
            })
            .collect(),
        job_id: job.id,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/jobs - summaries, newest first.
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    let jobs = state.store.list_jobs().await;
    Json(jobs.iter().map(Job::summary).collect())
}

/// GET /api/jobs/{job_id} - full job including agent logs.
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .store
        .get_job(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ArenaError::NotFound(format!("job {job_id}")).into())
}

#[derive(Debug, Deserialize)]
struct SelectBody {
    agent_ids: Vec<String>,
}

/// POST /api/jobs/{job_id}/select - complete the job with the chosen winners.
async fn select_winners(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<SelectBody>,
) -> Result<Json<Job>, ApiError> {
    let job = state.store.select_winners(&job_id, &body.agent_ids).await?;
    state.events.publish(ArenaEvent::JobCompleted {
        job_id: job.id.clone(),
    });
    Ok(Json(job))
}

/// POST /api/jobs/{job_id}/agents/{agent_id}/verification
async fn record_verification(
    State(state): State<AppState>,
    Path((job_id, agent_id)): Path<(String, String)>,
    Json(verification): Json<Verification>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .record_verification(&job_id, &agent_id, verification)
        .await?;
    state
        .events
        .publish(ArenaEvent::AgentUpdated { job_id, agent_id });
    Ok(StatusCode::NO_CONTENT)
}
