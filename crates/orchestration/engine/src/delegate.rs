//! Task delegation
//!
//! The engine hands delegated work to a [`TaskExecutor`] and suspends. The
//! executor reports the result through a [`ResponseSink`], keyed by the
//! correlation id derived from the task id.

use crate::queue::ResponseSink;
use async_trait::async_trait;
use dashmap::DashMap;
use orchestration_types::{
    CorrelationId, FailureInfo, OrchestrationError, OrchestrationResult, ResponseData,
    SetupAbstractions, TaskId, TaskRequest,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The external delegation subsystem, as seen by the engine
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Called once when the engine starts, before any task is queued
    fn bind(&self, _sink: ResponseSink) {}

    async fn queue_task(
        &self,
        setup_abstractions: &SetupAbstractions,
        task: TaskRequest,
    ) -> OrchestrationResult<TaskId>;

    async fn expire_task(
        &self,
        setup_abstractions: &SetupAbstractions,
        task_id: &TaskId,
    ) -> OrchestrationResult<()>;

    async fn abort_task(
        &self,
        setup_abstractions: &SetupAbstractions,
        task_id: &TaskId,
    ) -> OrchestrationResult<()>;
}

/// Runs one task type in process
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, parameters: Value) -> Result<Value, FailureInfo>;
}

/// Executes tasks on the local tokio runtime
pub struct LocalTaskExecutor {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    running: Arc<DashMap<TaskId, JoinHandle<()>>>,
    sink: OnceLock<ResponseSink>,
}

impl Default for LocalTaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTaskExecutor {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            running: Arc::new(DashMap::new()),
            sink: OnceLock::new(),
        }
    }

    pub fn with_handler(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Tasks that have not reported yet
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    fn stop(&self, task_id: &TaskId) -> bool {
        match self.running.remove(task_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TaskExecutor for LocalTaskExecutor {
    fn bind(&self, sink: ResponseSink) {
        if self.sink.set(sink).is_err() {
            tracing::warn!("Task executor already bound; keeping the first sink");
        }
    }

    async fn queue_task(
        &self,
        _setup_abstractions: &SetupAbstractions,
        task: TaskRequest,
    ) -> OrchestrationResult<TaskId> {
        let handler = self.handlers.get(&task.task_type).cloned().ok_or_else(|| {
            OrchestrationError::TaskDispatch(format!("no handler for task type {}", task.task_type))
        })?;
        let sink = self
            .sink
            .get()
            .cloned()
            .ok_or_else(|| OrchestrationError::TaskDispatch("executor not bound".to_string()))?;

        let task_id = TaskId::generate();
        let correlation_id = CorrelationId::from(&task_id);
        let running = self.running.clone();
        let id = task_id.clone();
        let task_type = task.task_type.clone();

        let (start_tx, start_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            // held until the handle is tracked, so removal always follows insertion
            if start_rx.await.is_err() {
                return;
            }
            let result = match task.timeout {
                Some(limit) => match tokio::time::timeout(limit, handler.run(task.parameters)).await {
                    Ok(result) => result,
                    Err(_) => Err(FailureInfo::timeout(format!(
                        "task {} exceeded {:?}",
                        task.task_type, limit
                    ))),
                },
                None => handler.run(task.parameters).await,
            };
            running.remove(&id);

            let payload = match result {
                Ok(data) => ResponseData::payload(data),
                Err(failure_info) => ResponseData::error(failure_info),
            };
            if let Err(err) = sink.respond(correlation_id, payload) {
                tracing::debug!(task_id = %id, error = %err, "Task result not delivered");
            }
        });
        self.running.insert(task_id.clone(), handle);
        let _ = start_tx.send(());

        tracing::debug!(task_id = %task_id, task_type = %task_type, "Task queued");
        Ok(task_id)
    }

    async fn expire_task(
        &self,
        _setup_abstractions: &SetupAbstractions,
        task_id: &TaskId,
    ) -> OrchestrationResult<()> {
        if self.stop(task_id) {
            tracing::debug!(task_id = %task_id, "Task expired");
        }
        Ok(())
    }

    async fn abort_task(
        &self,
        _setup_abstractions: &SetupAbstractions,
        task_id: &TaskId,
    ) -> OrchestrationResult<()> {
        if self.stop(task_id) {
            tracing::debug!(task_id = %task_id, "Task aborted");
        }
        Ok(())
    }
}
