use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use lci_model::{AgentId, CourseId, JobDescriptor, JobId, ResourceRequirements};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ApiError, ApiHandler, Authorizer, Caller};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
    auth: Arc<dyn Authorizer>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>, auth: Arc<dyn Authorizer>) -> Self {
        Self { handler, auth }
    }

    /// Routes:
    /// - GET    /courses/{courseId}/queued-jobs
    /// - GET    /courses/{courseId}/running-jobs
    /// - DELETE /courses/{courseId}/cancel-job/{jobId}
    /// - DELETE /courses/{courseId}/cancel-all-queued-jobs
    /// - DELETE /courses/{courseId}/cancel-all-running-jobs
    /// - GET    /agents
    /// - PUT    /agents/{agentId}/pause
    /// - PUT    /agents/{agentId}/resume
    /// - POST   /jobs
    /// - GET    /metrics
    pub fn router(self) -> Router {
        let state = ApiState {
            handler: self.handler,
            auth: self.auth,
        };
        Router::new()
            .route("/courses/{course}/queued-jobs", get(queued_jobs::<H>))
            .route("/courses/{course}/running-jobs", get(running_jobs::<H>))
            .route("/courses/{course}/cancel-job/{job}", delete(cancel_job::<H>))
            .route("/courses/{course}/cancel-all-queued-jobs", delete(cancel_all_queued::<H>))
            .route("/courses/{course}/cancel-all-running-jobs", delete(cancel_all_running::<H>))
            .route("/agents", get(agents::<H>))
            .route("/agents/{agent}/pause", put(pause_agent::<H>))
            .route("/agents/{agent}/resume", put(resume_agent::<H>))
            .route("/jobs", post(submit_job::<H>))
            .route("/metrics", get(metrics::<H>))
            .with_state(state)
    }
}

struct ApiState<H> {
    handler: Arc<H>,
    auth: Arc<dyn Authorizer>,
}

impl<H> Clone for ApiState<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<H> ApiState<H> {
    async fn instructor(&self, caller: &Caller, course: &str) -> Result<CourseId, ApiError> {
        let course: CourseId = course
            .parse()
            .map_err(|e| ApiError::InvalidRequest(format!("{e}")))?;
        if !self.auth.is_instructor(&caller.0, &course).await {
            return Err(ApiError::Forbidden(caller.0.clone()));
        }
        Ok(course)
    }

    async fn admin(&self, caller: &Caller) -> Result<(), ApiError> {
        if !self.auth.is_admin(&caller.0).await {
            return Err(ApiError::Forbidden(caller.0.clone()));
        }
        Ok(())
    }
}

/// Body of `POST /jobs`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub course: CourseId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub priority: i32,
    pub resources: ResourceRequirements,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

async fn queued_jobs<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let course = state.instructor(&caller, &course).await?;
    Ok(Json(state.handler.queued_jobs(&course).await?))
}

async fn running_jobs<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let course = state.instructor(&caller, &course).await?;
    Ok(Json(state.handler.running_jobs(&course).await?))
}

async fn cancel_job<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path((course, job)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let course = state.instructor(&caller, &course).await?;
    let job: JobId = job
        .parse()
        .map_err(|e| ApiError::InvalidRequest(format!("{e}")))?;
    state.handler.cancel_job(&course, &job).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_all_queued<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let course = state.instructor(&caller, &course).await?;
    let cancelled = state.handler.cancel_all_queued(&course).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

async fn cancel_all_running<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path(course): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let course = state.instructor(&caller, &course).await?;
    let cancelled = state.handler.cancel_all_running(&course).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

async fn agents<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    state.admin(&caller).await?;
    Ok(Json(state.handler.agents().await?))
}

async fn pause_agent<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path(agent): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.admin(&caller).await?;
    state.handler.pause_agent(&AgentId::from(agent)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_agent<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Path(agent): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.admin(&caller).await?;
    state.handler.resume_agent(&AgentId::from(agent)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_job<H: ApiHandler>(
    State(state): State<ApiState<H>>,
    caller: Caller,
    Json(req): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.instructor(&caller, req.course.as_str()).await?;
    if req.resources.steps.is_empty() {
        return Err(ApiError::InvalidRequest("job has no steps".into()));
    }
    let job = JobDescriptor {
        name: req.name,
        repository: req.repository,
        ..JobDescriptor::new(req.course, req.resources).with_priority(req.priority)
    };
    let job_id = state.handler.submit_job(job).await?;
    Ok((StatusCode::CREATED, Json(SubmitJobResponse { job_id })))
}

async fn metrics<H: ApiHandler>(
    State(state): State<ApiState<H>>,
) -> Result<impl IntoResponse, ApiError> {
    match state.handler.metrics() {
        Some(text) => Ok((
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text?,
        )),
        None => Err(ApiError::NotFound("metrics are not enabled".into())),
    }
}
