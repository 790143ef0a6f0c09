/// HTTP API Layer
///
/// REST endpoints over the stage engine and subscriber manager:
/// - Process config deploy and lookup
/// - Workflow creation, inspection and task reporting
/// - Worker subscribe / unsubscribe

use crate::runtime::StageEngine;
use crate::subscriber::SubscriberManager;
use std::sync::Arc;

// EngineError → status code + JSON body
pub mod error;

// Process config endpoints (POST/GET)
pub mod processes;

// Workflow endpoints including complete_task / fail_task
pub mod workflows;

// Subscription endpoints (POST/DELETE)
pub mod subscriptions;

pub use error::ApiError;
pub use processes::create_process_routes;
pub use subscriptions::create_subscription_routes;
pub use workflows::create_workflow_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Stage engine for processes and workflows
    pub engine: Arc<StageEngine>,
    /// Worker registrations and their delivery loops
    pub subscribers: Arc<SubscriberManager>,
}
