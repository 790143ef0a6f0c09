/// Process Management Layer
///
/// Process definitions, workflow state and their persistence:
/// - Type definitions (ProcessConfig, Workflow, TaskState, Job)
/// - SQLite persistence with sqlx
/// - Lock-free compiled-process registry using ArcSwap

// Core process and workflow type definitions
pub mod types;

// SQLite persistence for process configs and workflow state
pub mod storage;

// Hot-reload registry with deploy-time validation and readiness indexes
pub mod registry;

pub use registry::{CompiledProcess, ProcessRegistry};
pub use storage::ProcessStorage;
pub use types::{topic_for, Job, ProcessConfig, TaskState, TaskStatus, Workflow, START_STAGE};
