/// Process config endpoints
///
/// Deploying validates the stage/gate graph before anything is stored;
/// a deployed config is immutable.

use crate::api::{error::ApiError, AppState};
use crate::process::ProcessConfig;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

/// Response for a successful deploy
#[derive(Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    pub status: String,
    pub process_id: String,
}

pub fn create_process_routes() -> Router<AppState> {
    Router::new()
        .route("/process_configs", post(deploy_process_config))
        .route("/process_configs/{process_id}", get(get_process_config))
}

/// POST /process_configs
/// Body: { "process_id": "...", "stage_tasks": {...}, "stage_gates": {...} }
async fn deploy_process_config(
    State(state): State<AppState>,
    Json(config): Json<ProcessConfig>,
) -> Result<Json<DeployResponse>, ApiError> {
    let process = state.engine.deploy_process(config).await?;

    Ok(Json(DeployResponse {
        status: "deployed".to_string(),
        process_id: process.process_id().to_string(),
    }))
}

/// GET /process_configs/{process_id}
async fn get_process_config(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<Json<ProcessConfig>, ApiError> {
    Ok(Json(state.engine.get_process(&process_id).await?))
}
