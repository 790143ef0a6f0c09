/// Workflow REST API endpoints
///
/// Creating a workflow dispatches its `start` stage immediately. Task
/// completion and failure are reported here by workers.

use crate::api::{error::ApiError, AppState};
use crate::process::Workflow;
use crate::runtime::CompletionOutcome;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub process_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateWorkflowResponse {
    pub workflow_id: String,
}

/// Body of both complete_task and fail_task
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskRequest {
    pub workflow_id: String,
    pub task: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteTaskResponse {
    pub status: String,
    #[serde(flatten)]
    pub outcome: CompletionOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows/{workflow_id}", get(get_workflow))
        .route("/workflows/complete_task", post(complete_task))
        .route("/workflows/fail_task", post(fail_task))
}

/// POST /workflows
/// Body: { "process_id": "..." }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<CreateWorkflowResponse>, ApiError> {
    let workflow_id = state.engine.create_workflow(&payload.process_id).await?;
    Ok(Json(CreateWorkflowResponse { workflow_id }))
}

/// GET /workflows/{workflow_id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.engine.get_workflow(&workflow_id).await?))
}

/// POST /workflows/complete_task
/// Body: { "workflow_id": "...", "task": "..." }
async fn complete_task(
    State(state): State<AppState>,
    Json(payload): Json<TaskRequest>,
) -> Result<Json<CompleteTaskResponse>, ApiError> {
    let outcome = state
        .engine
        .complete_task(&payload.workflow_id, &payload.task)
        .await?;

    Ok(Json(CompleteTaskResponse {
        status: "completed".to_string(),
        outcome,
    }))
}

/// POST /workflows/fail_task
async fn fail_task(
    State(state): State<AppState>,
    Json(payload): Json<TaskRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .engine
        .fail_task(&payload.workflow_id, &payload.task)
        .await?;

    Ok(Json(StatusResponse {
        status: "failed".to_string(),
    }))
}
