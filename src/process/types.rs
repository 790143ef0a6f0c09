/// Core process and workflow type definitions
///
/// A `ProcessConfig` is the immutable definition clients deploy; a `Workflow`
/// is one running instantiation of it. Both are persisted as JSON columns and
/// travel over the HTTP API unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the stage that is published as soon as a workflow is created
pub const START_STAGE: &str = "start";

/// Prefix shared by every delivery topic
pub const TOPIC_PREFIX: &str = "stageline";

/// Topic carrying jobs for one (process, task) pair
pub fn topic_for(process_id: &str, task: &str) -> String {
    format!("{}:{}:{}", TOPIC_PREFIX, process_id, task)
}

/// Immutable process definition
///
/// `stage_tasks` lists the tasks a stage activates; `stage_gates` lists the
/// tasks that must all be completed before a stage is published. Only the
/// `start` stage has no gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Unique process identifier (e.g., "onboarding")
    pub process_id: String,
    /// stage -> ordered tasks activated by that stage
    pub stage_tasks: BTreeMap<String, Vec<String>>,
    /// stage -> tasks that must be completed before the stage is published
    #[serde(default)]
    pub stage_gates: BTreeMap<String, Vec<String>>,
}

/// Lifecycle state of a single task inside a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl TaskState {
    /// Completed and failed tasks never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Waiting => "waiting",
            TaskState::Active => "active",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status entry for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    pub fn new(status: TaskState) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
        }
    }
}

/// One instantiation of a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub process_id: String,
    /// task -> status; holds exactly one entry per task of the process
    pub task_status: BTreeMap<String, TaskStatus>,
    /// stage -> published flag; once true it never reverts
    pub published_stage: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.task_status.get(task).map(|s| s.status)
    }

    pub fn is_published(&self, stage: &str) -> bool {
        self.published_stage.get(stage).copied().unwrap_or(false)
    }

    /// Set a task's state and stamp the update time
    pub(crate) fn set_state(&mut self, task: &str, state: TaskState) {
        self.task_status
            .insert(task.to_string(), TaskStatus::new(state));
    }

    pub fn tasks_in(&self, state: TaskState) -> Vec<&str> {
        self.task_status
            .iter()
            .filter(|(_, s)| s.status == state)
            .map(|(t, _)| t.as_str())
            .collect()
    }
}

/// Delivery payload POSTed to a worker's callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub process_id: String,
    pub task_id: String,
    pub workflow_id: String,
}

impl Job {
    pub fn topic(&self) -> String {
        topic_for(&self.process_id, &self.task_id)
    }
}
