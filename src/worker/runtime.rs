/// Worker-side job intake
///
/// Serves the two endpoints the engine calls on a worker: a health probe and
/// the job callback. A delivered job is acknowledged with 200 right away and
/// handled in the background; the outcome is reported back through
/// [`EngineClient`].

use crate::process::Job;
use crate::subscriber::SubscribeRequest;
use crate::worker::client::EngineClient;
use crate::worker::handler::HandlerRegistry;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkerRuntime {
    handlers: Arc<HandlerRegistry>,
    engine: EngineClient,
}

impl WorkerRuntime {
    pub fn new(handlers: HandlerRegistry, engine: EngineClient) -> Self {
        Self {
            handlers: Arc::new(handlers),
            engine,
        }
    }

    /// Subscribe every registered (process, task) pair to this worker.
    ///
    /// Failures are logged per task; returns the session keys obtained.
    pub async fn subscribe_all(
        &self,
        health_check_url: &str,
        callback_url: &str,
        ttl_secs: Option<u64>,
    ) -> anyhow::Result<Vec<String>> {
        if self.handlers.is_empty() {
            anyhow::bail!("no task handlers registered");
        }

        let mut session_keys = Vec::new();
        for (process_id, task) in self.handlers.tasks() {
            let request = SubscribeRequest {
                process_id: process_id.to_string(),
                task: task.to_string(),
                health_check_url: health_check_url.to_string(),
                callback_url: callback_url.to_string(),
                ttl_secs,
            };
            match self.engine.subscribe(&request).await {
                Ok(session_key) => session_keys.push(session_key),
                Err(e) => tracing::warn!(
                    "⚠️ Could not subscribe to {}/{}: {}",
                    process_id,
                    task,
                    e
                ),
            }
        }
        Ok(session_keys)
    }

    /// Run the handler for `job` and report the result to the engine
    pub async fn run_job(&self, job: Job) {
        let Some(handler) = self.handlers.get(&job.process_id, &job.task_id) else {
            tracing::warn!("No handler for {}/{}", job.process_id, job.task_id);
            return;
        };

        let reported = match handler.handle(&job).await {
            Ok(()) => self
                .engine
                .complete_task(&job.workflow_id, &job.task_id)
                .await
                .map(|_| ()),
            Err(e) => {
                tracing::warn!(
                    "❌ Task {} of workflow {} failed: {}",
                    job.task_id,
                    job.workflow_id,
                    e
                );
                self.engine.fail_task(&job.workflow_id, &job.task_id).await
            }
        };

        if let Err(e) = reported {
            tracing::error!(
                "❌ Could not report task {} of workflow {}: {}",
                job.task_id,
                job.workflow_id,
                e
            );
        }
    }
}

/// Router for a worker process: `GET /health` and `POST /jobs`
pub fn worker_routes(runtime: WorkerRuntime) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(receive_job))
        .with_state(runtime)
}

async fn health() -> &'static str {
    "ok"
}

/// POST /jobs
/// Body: { "process_id": "...", "task_id": "...", "workflow_id": "..." }
async fn receive_job(
    State(runtime): State<WorkerRuntime>,
    payload: Result<Json<Job>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let job = match payload {
        Ok(Json(job)) => job,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": rejection.body_text() })),
            )
        }
    };

    if job.process_id.is_empty() || job.task_id.is_empty() || job.workflow_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing required fields" })),
        );
    }

    if runtime.handlers.get(&job.process_id, &job.task_id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no handler for {}/{}", job.process_id, job.task_id) })),
        );
    }

    tracing::debug!("📥 Received job {}/{} for {}", job.process_id, job.task_id, job.workflow_id);
    tokio::spawn(async move { runtime.run_job(job).await });

    (StatusCode::OK, Json(json!({ "status": "accepted" })))
}
