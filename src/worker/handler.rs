/// Typed task handlers for worker processes
///
/// A worker registers one handler per (process, task) pair. The registry is
/// built before the worker starts serving and is read-only afterwards.

use crate::process::Job;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Do the work for `job`. `Ok` reports the task completed, `Err` failed.
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        (self.0)(job.clone()).await
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<(String, String), Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `task` of `process_id`
    pub fn register(
        &mut self,
        process_id: impl Into<String>,
        task: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> &mut Self {
        self.handlers
            .insert((process_id.into(), task.into()), Arc::new(handler));
        self
    }

    pub fn get(&self, process_id: &str, task: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&(process_id.to_string(), task.to_string()))
            .cloned()
    }

    /// Every registered (process_id, task) pair
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &str)> {
        self.handlers
            .keys()
            .map(|(process_id, task)| (process_id.as_str(), task.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
