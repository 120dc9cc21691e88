//! Versioned access to execution records
//!
//! Every write goes through a read-modify-replace loop guarded by the
//! record version. A write that loses the race re-reads and retries, up to
//! `max_update_attempts`.

use crate::clock::EngineClock;
use crate::storage::{NodeExecutionStorage, PlanExecutionStorage, Storage};
use orchestration_types::{
    NodeExecution, NodeExecutionId, OrchestrationError, OrchestrationResult, PlanExecution,
    PlanExecutionId, Status, StatusUpdate, StorageError,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub(crate) struct ExecutionService {
    storage: Arc<dyn Storage>,
    clock: EngineClock,
    updates: broadcast::Sender<StatusUpdate>,
    max_attempts: u32,
}

impl ExecutionService {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        clock: EngineClock,
        updates: broadcast::Sender<StatusUpdate>,
        max_attempts: u32,
    ) -> Self {
        Self {
            storage,
            clock,
            updates,
            max_attempts: max_attempts.max(1),
        }
    }

    // ── Node executions ──────────────────────────────────────────────

    pub(crate) async fn node(&self, id: &NodeExecutionId) -> OrchestrationResult<NodeExecution> {
        self.storage
            .get_node_execution(id)
            .await?
            .ok_or_else(|| OrchestrationError::NodeExecutionNotFound(id.clone()))
    }

    pub(crate) async fn create_node(&self, node: NodeExecution) -> OrchestrationResult<()> {
        tracing::debug!(
            node_execution_id = %node.uuid,
            plan_node_id = %node.plan_node_id(),
            "Node execution created"
        );
        self.storage.create_node_execution(node).await?;
        Ok(())
    }

    /// Apply `ops` when it returns true; `None` when it declined
    pub(crate) async fn update_node_if<F>(
        &self,
        id: &NodeExecutionId,
        mut ops: F,
    ) -> OrchestrationResult<Option<NodeExecution>>
    where
        F: FnMut(&mut NodeExecution) -> bool + Send,
    {
        for _ in 0..self.max_attempts {
            let mut node = self.node(id).await?;
            if !ops(&mut node) {
                return Ok(None);
            }
            node.updated_at = self.clock.now();
            match self.storage.replace_node_execution(node).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrchestrationError::ConcurrentModification(id.to_string()))
    }

    pub(crate) async fn update_node<F>(
        &self,
        id: &NodeExecutionId,
        mut ops: F,
    ) -> OrchestrationResult<NodeExecution>
    where
        F: FnMut(&mut NodeExecution) + Send,
    {
        self.update_node_if(id, |node| {
            ops(node);
            true
        })
        .await?
        .ok_or_else(|| OrchestrationError::NodeExecutionNotFound(id.clone()))
    }

    /// Move a node from any of `from` to `to`.
    ///
    /// Returns `None` when the node is no longer in one of `from`. `ops`
    /// runs before the status changes, so it still sees the old status.
    pub(crate) async fn transition<F>(
        &self,
        id: &NodeExecutionId,
        from: &[Status],
        to: Status,
        mut ops: F,
    ) -> OrchestrationResult<Option<NodeExecution>>
    where
        F: FnMut(&mut NodeExecution) + Send,
    {
        for _ in 0..self.max_attempts {
            let mut node = self.node(id).await?;
            let previous = node.status;
            if !from.contains(&previous) {
                return Ok(None);
            }
            if !previous.can_transition_to(to) {
                return Err(OrchestrationError::InvalidTransition {
                    node_execution_id: id.clone(),
                    from: previous,
                    to,
                });
            }

            ops(&mut node);
            let now = self.clock.now();
            node.status = to;
            node.updated_at = now;
            if to == Status::Running && node.start_ts.is_none() {
                node.start_ts = Some(now);
            }
            if to.is_final() {
                node.end_ts = Some(now);
            }

            match self.storage.replace_node_execution(node).await {
                Ok(stored) => {
                    tracing::info!(
                        node_execution_id = %id,
                        plan_node_id = %stored.plan_node_id(),
                        from = %previous,
                        to = %to,
                        "Node status changed"
                    );
                    let _ = self.updates.send(StatusUpdate::Node {
                        plan_execution_id: stored.plan_execution_id().clone(),
                        node_execution_id: id.clone(),
                        plan_node_id: stored.plan_node_id().clone(),
                        from: previous,
                        to,
                        version: stored.version,
                        at: now,
                    });
                    return Ok(Some(stored));
                }
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrchestrationError::ConcurrentModification(id.to_string()))
    }

    pub(crate) async fn children(&self, parent_id: &NodeExecutionId) -> OrchestrationResult<Vec<NodeExecution>> {
        Ok(self.storage.list_children(parent_id).await?)
    }

    pub(crate) async fn nodes_of(&self, plan_execution_id: &PlanExecutionId) -> OrchestrationResult<Vec<NodeExecution>> {
        Ok(self.storage.list_node_executions(plan_execution_id).await?)
    }

    // ── Plan executions ──────────────────────────────────────────────

    pub(crate) async fn plan(&self, id: &PlanExecutionId) -> OrchestrationResult<PlanExecution> {
        self.storage
            .get_plan_execution(id)
            .await?
            .ok_or_else(|| OrchestrationError::PlanExecutionNotFound(id.clone()))
    }

    /// Apply `ops` when it returns true, broadcasting any status change
    pub(crate) async fn update_plan_if<F>(
        &self,
        id: &PlanExecutionId,
        mut ops: F,
    ) -> OrchestrationResult<Option<PlanExecution>>
    where
        F: FnMut(&mut PlanExecution) -> bool + Send,
    {
        for _ in 0..self.max_attempts {
            let mut plan = self.plan(id).await?;
            let previous = plan.status;
            if !ops(&mut plan) {
                return Ok(None);
            }
            let now = self.clock.now();
            if plan.status.is_final() && plan.end_ts.is_none() {
                plan.end_ts = Some(now);
            }
            match self.storage.replace_plan_execution(plan).await {
                Ok(stored) => {
                    if stored.status != previous {
                        tracing::info!(
                            plan_execution_id = %id,
                            from = %previous,
                            to = %stored.status,
                            "Plan status changed"
                        );
                        let _ = self.updates.send(StatusUpdate::Plan {
                            plan_execution_id: id.clone(),
                            from: previous,
                            to: stored.status,
                            at: now,
                        });
                    }
                    return Ok(Some(stored));
                }
                Err(StorageError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrchestrationError::ConcurrentModification(id.to_string()))
    }
}
