/// Runtime Layer
///
/// Everything that moves a workflow forward:
/// - Stage engine: task transitions, stage readiness and job dispatch
/// - Dispatch bridge: HTTP delivery and health probing of workers

// Per-workflow state machine with transactional job enqueue
pub mod engine;

// reqwest-based delivery to worker callbacks
pub mod dispatch;

pub use dispatch::DispatchBridge;
pub use engine::{CompletionOutcome, StageEngine};
