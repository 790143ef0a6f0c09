/// Worker subscription endpoints

use crate::api::{error::ApiError, workflows::StatusResponse, AppState};
use crate::subscriber::SubscribeRequest;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, post},
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub session_key: String,
}

pub fn create_subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/subscriptions", post(subscribe))
        .route("/subscriptions/{session_key}", delete(unsubscribe))
}

/// POST /subscriptions
/// Body: { "process_id", "task", "health_check_url", "callback_url", "ttl_secs"? }
async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let session_key = state.subscribers.subscribe(request).await?;
    Ok(Json(SubscribeResponse { session_key }))
}

/// DELETE /subscriptions/{session_key}
async fn unsubscribe(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.subscribers.unsubscribe(&session_key).await?;
    Ok(Json(StatusResponse {
        status: "unsubscribed".to_string(),
    }))
}
