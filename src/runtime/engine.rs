/// Stage engine: the per-workflow task state machine
///
/// Decides what to dispatch and when. Every mutation of a workflow runs under
/// a per-workflow async lock and inside one SQLite write transaction that also
/// carries the queue inserts for the tasks it dispatches, so a stage is
/// published (and its tasks enqueued) at most once no matter how many
/// completions race to discover that it is ready.

use crate::broker::LeaseQueue;
use crate::error::{EngineError, Result};
use crate::process::{
    CompiledProcess, Job, ProcessConfig, ProcessRegistry, ProcessStorage, TaskState, TaskStatus,
    Workflow, START_STAGE,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// What a `complete_task` call changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    /// True when the task was already completed and nothing changed
    pub already_completed: bool,
    /// Stages published by this completion
    pub published_stages: Vec<String>,
    /// Tasks promoted to active and enqueued by this completion
    pub dispatched_tasks: Vec<String>,
}

#[derive(Debug)]
pub struct StageEngine {
    storage: ProcessStorage,
    registry: Arc<ProcessRegistry>,
    queue: LeaseQueue,
    locks: WorkflowLocks,
}

impl StageEngine {
    pub fn new(storage: ProcessStorage, registry: Arc<ProcessRegistry>, queue: LeaseQueue) -> Self {
        Self {
            storage,
            registry,
            queue,
            locks: WorkflowLocks::default(),
        }
    }

    pub fn queue(&self) -> &LeaseQueue {
        &self.queue
    }

    /// Validate and persist a new process definition
    pub async fn deploy_process(&self, config: ProcessConfig) -> Result<Arc<CompiledProcess>> {
        self.registry.deploy(config).await
    }

    pub async fn get_process(&self, process_id: &str) -> Result<ProcessConfig> {
        Ok(self.registry.get(process_id).await?.config.clone())
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        self.storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Instantiate a process: seed every task as waiting, publish `start`,
    /// and dispatch its tasks. Returns the new workflow id.
    pub async fn create_workflow(&self, process_id: &str) -> Result<String> {
        let process = self.registry.get(process_id).await?;
        let now = Utc::now();

        let mut workflow = Workflow {
            workflow_id: Uuid::new_v4().to_string(),
            process_id: process_id.to_string(),
            task_status: process
                .tasks()
                .map(|task| (task.to_string(), TaskStatus::new(TaskState::Waiting)))
                .collect(),
            published_stage: process
                .gated_stages()
                .map(|stage| (stage.to_string(), false))
                .collect(),
            created_at: now,
            updated_at: now,
        };
        let dispatched = publish_stage(&process, &mut workflow, START_STAGE);

        let mut tx = self.storage.begin().await?;
        self.storage.insert_workflow_in(&mut tx, &workflow).await?;
        let jobs = self
            .enqueue_jobs_in(&mut tx, &workflow, &dispatched)
            .await?;
        tx.commit().await?;
        self.notify(&jobs).await;

        tracing::info!(
            "🚀 Created workflow {} for process {} (dispatched: {:?})",
            workflow.workflow_id,
            process_id,
            dispatched
        );
        Ok(workflow.workflow_id)
    }

    /// Mark an active task completed and publish every stage that became ready.
    ///
    /// Completing an already completed task is a successful no-op, so workers
    /// may safely repeat completion calls. Only active tasks can complete:
    /// a waiting task was never dispatched and a failed one stays failed, and
    /// both give `InvalidTransition`.
    pub async fn complete_task(&self, workflow_id: &str, task: &str) -> Result<CompletionOutcome> {
        let _guard = self.locks.acquire(workflow_id).await;

        let mut tx = self.storage.begin().await?;
        let mut workflow = self.claim_workflow(&mut tx, workflow_id).await?;
        let process = self.registry.get(&workflow.process_id).await?;

        match workflow.state_of(task) {
            None => return Err(EngineError::task_not_found(workflow_id, task)),
            Some(TaskState::Completed) => {
                tracing::debug!("⏭️ Task {} of {} already completed", task, workflow_id);
                return Ok(CompletionOutcome {
                    already_completed: true,
                    ..Default::default()
                });
            }
            Some(TaskState::Active) => {}
            Some(from) => {
                return Err(EngineError::InvalidTransition {
                    task: task.to_string(),
                    from,
                    to: TaskState::Completed,
                })
            }
        }

        let outcome = advance(&process, &mut workflow, task);
        workflow.updated_at = Utc::now();

        self.storage.save_workflow_state_in(&mut tx, &workflow).await?;
        let jobs = self
            .enqueue_jobs_in(&mut tx, &workflow, &outcome.dispatched_tasks)
            .await?;
        tx.commit().await?;
        self.notify(&jobs).await;

        tracing::info!(
            "✅ Completed task {} of workflow {} (published: {:?})",
            task,
            workflow_id,
            outcome.published_stages
        );
        Ok(outcome)
    }

    /// Mark a task failed. Readiness is not re-evaluated: a failed task never
    /// satisfies a gate, so stages gated on it stay unpublished.
    pub async fn fail_task(&self, workflow_id: &str, task: &str) -> Result<()> {
        let _guard = self.locks.acquire(workflow_id).await;

        let mut tx = self.storage.begin().await?;
        let mut workflow = self.claim_workflow(&mut tx, workflow_id).await?;

        match workflow.state_of(task) {
            None => return Err(EngineError::task_not_found(workflow_id, task)),
            Some(TaskState::Failed) => return Ok(()),
            Some(from) if from.is_terminal() => {
                return Err(EngineError::InvalidTransition {
                    task: task.to_string(),
                    from,
                    to: TaskState::Failed,
                })
            }
            Some(_) => {}
        }

        workflow.set_state(task, TaskState::Failed);
        workflow.updated_at = Utc::now();
        self.storage.save_workflow_state_in(&mut tx, &workflow).await?;
        tx.commit().await?;

        tracing::warn!("❌ Task {} of workflow {} marked failed", task, workflow_id);
        Ok(())
    }

    /// Become the writer for `workflow_id` and load its current state
    async fn claim_workflow(&self, conn: &mut SqliteConnection, workflow_id: &str) -> Result<Workflow> {
        if !self.storage.claim_workflow_in(conn, workflow_id).await? {
            return Err(EngineError::WorkflowNotFound(workflow_id.to_string()));
        }
        self.storage
            .get_workflow_in(conn, workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn enqueue_jobs_in(
        &self,
        conn: &mut SqliteConnection,
        workflow: &Workflow,
        tasks: &[String],
    ) -> Result<Vec<Job>> {
        let mut jobs = Vec::with_capacity(tasks.len());
        for task in tasks {
            let job = Job {
                process_id: workflow.process_id.clone(),
                task_id: task.clone(),
                workflow_id: workflow.workflow_id.clone(),
            };
            let payload = serde_json::to_vec(&job)?;
            self.queue.enqueue_in(conn, &job.topic(), &payload).await?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn notify(&self, jobs: &[Job]) {
        for job in jobs {
            self.queue.notify(&job.topic()).await;
        }
    }
}

/// Apply a completion of `task` to an in-memory workflow: re-check only the
/// unpublished stages gated on it and publish those that are ready.
fn advance(process: &CompiledProcess, workflow: &mut Workflow, task: &str) -> CompletionOutcome {
    workflow.set_state(task, TaskState::Completed);

    let mut outcome = CompletionOutcome::default();
    for stage in process.stages_gated_on(task) {
        if workflow.is_published(stage) || !is_ready(process, workflow, stage) {
            continue;
        }
        outcome.published_stages.push(stage.clone());
        outcome
            .dispatched_tasks
            .extend(publish_stage(process, workflow, stage));
    }
    outcome
}

/// A stage is ready when every task of its gate is completed
fn is_ready(process: &CompiledProcess, workflow: &Workflow, stage: &str) -> bool {
    process
        .stage_gate(stage)
        .iter()
        .all(|task| workflow.state_of(task) == Some(TaskState::Completed))
}

/// Flip the stage to published and promote its waiting tasks to active.
/// Returns the promoted tasks, which the caller must enqueue.
fn publish_stage(process: &CompiledProcess, workflow: &mut Workflow, stage: &str) -> Vec<String> {
    workflow.published_stage.insert(stage.to_string(), true);

    let mut promoted = Vec::new();
    for task in process.stage_tasks(stage) {
        if workflow.state_of(task) == Some(TaskState::Waiting) {
            workflow.set_state(task, TaskState::Active);
            promoted.push(task.clone());
        }
    }
    promoted
}

/// Per-workflow mutual exclusion. Entries are dropped once nobody holds or
/// waits on them.
#[derive(Debug, Default)]
struct WorkflowLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl WorkflowLocks {
    async fn acquire(&self, workflow_id: &str) -> WorkflowLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(workflow_id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;

        WorkflowLockGuard {
            workflow_id: workflow_id.to_string(),
            lock,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct WorkflowLockGuard {
    workflow_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Drop for WorkflowLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this guard still reference the lock.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.workflow_id);
        }
    }
}
