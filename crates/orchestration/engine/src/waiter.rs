//! Wait/notify: routes asynchronous responses to the waiting node execution
//!
//! A suspended node registers the correlation ids it waits on. Responses
//! are matched by correlation id; each id is consumed exactly once. A
//! response that arrived before its wait is registered is held until the
//! wait appears. A duplicate or late response is dropped and counted.
//!
//! The table itself lives in [`CorrelationStorage`]. Every operation here is
//! a read-modify-write of it, serialized by one lock.

use crate::clock::EngineClock;
use crate::storage::{CorrelationStorage, Storage};
use orchestration_types::{
    CorrelationId, CorrelationWait, EarlyResponse, NodeExecutionId, OrchestrationResult,
    PlanExecutionId, ResponseData, ResponseDataMap,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of registering a wait
#[derive(Debug, PartialEq)]
pub enum WaitRegistration {
    /// Still waiting on at least one id
    Pending,
    /// Every id had already been answered
    Ready(ResponseDataMap),
}

/// Result of delivering one response
#[derive(Debug, PartialEq)]
pub enum NotifyOutcome {
    /// The last outstanding id of a wait was answered
    Completed {
        node_execution_id: NodeExecutionId,
        responses: ResponseDataMap,
    },
    /// One id of a progress-reporting wait was answered; others remain
    Progress {
        node_execution_id: NodeExecutionId,
        correlation_id: CorrelationId,
        data: ResponseData,
    },
    /// Recorded against a wait that still has outstanding ids
    Recorded,
    /// No wait yet; held until one is registered
    Buffered,
    /// Duplicate or late; ignored
    Dropped,
}

/// Correlation table for suspended node executions
pub struct WaitNotifyEngine {
    storage: Arc<dyn Storage>,
    clock: EngineClock,
    lock: Mutex<()>,
    dropped: AtomicU64,
}

impl WaitNotifyEngine {
    pub fn new(storage: Arc<dyn Storage>, clock: EngineClock) -> Self {
        Self {
            storage,
            clock,
            lock: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a wait for `correlation_ids` on behalf of a node.
    ///
    /// With `progress`, every response except the last is reported as
    /// [`NotifyOutcome::Progress`]. Adding ids to a node that already waits
    /// extends its wait.
    pub async fn wait_for_all(
        &self,
        node_execution_id: &NodeExecutionId,
        plan_execution_id: &PlanExecutionId,
        correlation_ids: Vec<CorrelationId>,
        progress: bool,
    ) -> OrchestrationResult<WaitRegistration> {
        let _guard = self.lock.lock().await;
        let mut wait = match self.storage.get_wait(node_execution_id).await? {
            Some(wait) => wait,
            None => CorrelationWait::new(node_execution_id.clone(), plan_execution_id.clone(), progress),
        };
        for id in correlation_ids {
            if let Some(early) = self.storage.take_early_response(&id).await? {
                wait.received.insert(id.clone(), early.data);
            }
            wait.expected.insert(id);
        }

        tracing::debug!(
            node_execution_id = %node_execution_id,
            expected = wait.expected.len(),
            received = wait.received.len(),
            "Wait registered"
        );

        if wait.is_complete() {
            let responses = self.complete(wait).await?;
            return Ok(WaitRegistration::Ready(responses));
        }
        self.storage.save_wait(wait).await?;
        Ok(WaitRegistration::Pending)
    }

    /// Deliver a response for one correlation id
    pub async fn notify(&self, correlation_id: CorrelationId, data: ResponseData) -> OrchestrationResult<NotifyOutcome> {
        let _guard = self.lock.lock().await;

        if self.storage.is_consumed(&correlation_id).await? {
            return Ok(self.drop_response(&correlation_id, "already consumed"));
        }

        let Some(mut wait) = self.storage.find_wait(&correlation_id).await? else {
            if self.storage.get_early_response(&correlation_id).await?.is_some() {
                return Ok(self.drop_response(&correlation_id, "duplicate before wait"));
            }
            self.storage
                .save_early_response(EarlyResponse {
                    correlation_id: correlation_id.clone(),
                    data,
                    received_at: self.clock.now(),
                })
                .await?;
            tracing::debug!(correlation_id = %correlation_id, "Response buffered ahead of its wait");
            return Ok(NotifyOutcome::Buffered);
        };

        if wait.received.contains_key(&correlation_id) {
            return Ok(self.drop_response(&correlation_id, "duplicate"));
        }
        wait.received.insert(correlation_id.clone(), data.clone());

        let node_execution_id = wait.node_execution_id.clone();
        if wait.is_complete() {
            let responses = self.complete(wait).await?;
            return Ok(NotifyOutcome::Completed {
                node_execution_id,
                responses,
            });
        }
        let progress = wait.progress;
        self.storage.save_wait(wait).await?;
        if progress {
            return Ok(NotifyOutcome::Progress {
                node_execution_id,
                correlation_id,
                data,
            });
        }
        Ok(NotifyOutcome::Recorded)
    }

    /// Drop a node's wait; its outstanding ids become consumed so late
    /// responses are ignored. Returns the ids that were still outstanding.
    pub async fn cancel_waits(&self, node_execution_id: &NodeExecutionId) -> OrchestrationResult<Vec<CorrelationId>> {
        let _guard = self.lock.lock().await;
        let Some(wait) = self.storage.remove_wait(node_execution_id).await? else {
            return Ok(Vec::new());
        };
        let outstanding = wait.outstanding();
        self.storage
            .mark_consumed(&wait.plan_execution_id, wait.expected.into_iter().collect())
            .await?;
        if !outstanding.is_empty() {
            tracing::debug!(
                node_execution_id = %node_execution_id,
                outstanding = outstanding.len(),
                "Wait cancelled"
            );
        }
        Ok(outstanding)
    }

    /// Swap `previous` for `replacement` in a node's wait, discarding any
    /// answer already recorded for `previous`.
    ///
    /// Returns false when the node no longer waits on `previous`. A late
    /// response for `previous` is dropped afterwards.
    pub async fn reopen(
        &self,
        node_execution_id: &NodeExecutionId,
        previous: &CorrelationId,
        replacement: CorrelationId,
    ) -> OrchestrationResult<bool> {
        let _guard = self.lock.lock().await;
        let Some(mut wait) = self.storage.get_wait(node_execution_id).await? else {
            return Ok(false);
        };
        if !wait.expected.remove(previous) {
            return Ok(false);
        }
        wait.received.remove(previous);
        wait.expected.insert(replacement.clone());
        let plan_execution_id = wait.plan_execution_id.clone();
        self.storage.save_wait(wait).await?;
        self.storage
            .mark_consumed(&plan_execution_id, vec![previous.clone()])
            .await?;

        tracing::debug!(
            node_execution_id = %node_execution_id,
            previous = %previous,
            replacement = %replacement,
            "Wait reopened"
        );
        Ok(true)
    }

    /// Forget a finished plan's records, along with held responses older
    /// than `early_retention`
    pub async fn prune(&self, plan_execution_id: &PlanExecutionId, early_retention: Duration) -> OrchestrationResult<usize> {
        let _guard = self.lock.lock().await;
        let mut removed = self.storage.prune_correlations(plan_execution_id).await?;
        let retention = chrono::Duration::from_std(early_retention).unwrap_or_else(|_| chrono::Duration::zero());
        removed += self
            .storage
            .prune_early_responses(self.clock.now() - retention)
            .await?;
        tracing::debug!(plan_execution_id = %plan_execution_id, removed, "Correlations pruned");
        Ok(removed)
    }

    pub async fn is_waiting(&self, node_execution_id: &NodeExecutionId) -> OrchestrationResult<bool> {
        Ok(self.storage.get_wait(node_execution_id).await?.is_some())
    }

    /// Number of duplicate or late responses dropped so far
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn complete(&self, wait: CorrelationWait) -> OrchestrationResult<ResponseDataMap> {
        self.storage.remove_wait(&wait.node_execution_id).await?;
        self.storage
            .mark_consumed(&wait.plan_execution_id, wait.expected.into_iter().collect())
            .await?;
        Ok(wait.received)
    }

    fn drop_response(&self, correlation_id: &CorrelationId, reason: &str) -> NotifyOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(correlation_id = %correlation_id, reason, "Dropping response");
        NotifyOutcome::Dropped
    }
}
