/// Stageline: staged workflow orchestration over a durable lease queue
///
/// Processes are declared as stages of tasks gated on the completion of other
/// tasks. The engine publishes stages as their gates complete, queues one job
/// per dispatched task and pushes jobs to subscribed HTTP workers with
/// at-least-once delivery.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// SQLite pool and schema
pub mod store;

// Process definitions, workflow state and the compiled-process registry
pub mod process;

// Per-topic FIFO lease queue and expired-lease reclamation
pub mod broker;

// Stage engine and HTTP dispatch bridge
pub mod runtime;

// Worker registrations, health tracking and delivery loops
pub mod subscriber;

// HTTP API layer - REST endpoints for processes, workflows and subscriptions
pub mod api;

// Worker SDK - handler registry, job callback routes and engine client
pub mod worker;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, Result};
pub use process::{Job, ProcessConfig, TaskState, Workflow};
pub use runtime::{CompletionOutcome, StageEngine};
pub use server::{start_server, App};
