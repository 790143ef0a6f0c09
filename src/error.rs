/// Engine error taxonomy
///
/// Every fallible engine, broker and subscriber operation returns `EngineError`.
/// The HTTP layer maps each variant onto a status code; the server wiring code
/// keeps using `anyhow` for startup failures.

use crate::process::types::TaskState;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("process config not found: {0}")]
    ConfigNotFound(String),

    #[error("process config already deployed: {0}")]
    ConfigExists(String),

    #[error("invalid process config: {0}")]
    InvalidConfig(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("task '{task}' not found in {scope}")]
    TaskNotFound { scope: String, task: String },

    #[error("task '{task}' cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("subscriber already registered for {process_id}/{task} at {callback_url}")]
    DuplicateSubscription {
        process_id: String,
        task: String,
        callback_url: String,
    },

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("health check failed for {url}: {reason}")]
    HealthCheckFailed { url: String, reason: String },

    /// Non-fatal: the lease is left to expire and the message is redelivered.
    #[error("delivery to {url} failed: {reason}")]
    DeliveryFailed { url: String, reason: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt timestamp '{raw}': {source}")]
    CorruptTimestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl EngineError {
    pub fn task_not_found(scope: impl Into<String>, task: impl Into<String>) -> Self {
        Self::TaskNotFound {
            scope: scope.into(),
            task: task.into(),
        }
    }

    /// True for lookups of things that do not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::WorkflowNotFound(_)
                | Self::TaskNotFound { .. }
                | Self::SubscriptionNotFound(_)
        )
    }
}
