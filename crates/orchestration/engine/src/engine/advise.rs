//! Advising and what follows it: successors, retries, interventions and
//! the end of chains and plans

use super::OrchestrationEngine;
use crate::adviser::{self, AdvisingEvent};
use chrono::{DateTime, Utc};
use orchestration_types::{
    aggregate_status, AdviserResponse, EngineEvent, FailureInfo, Interrupt, InterruptEffect,
    InterruptRecord, Level, NodeExecution, NodeExecutionId, OrchestrationResult,
    PlanExecutionId, PlanNodeId, RepairAction, ResponseData, Status, StepResponseNotifyData,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The plan node a response continues with, if any
fn successor_of(response: &AdviserResponse) -> Option<&PlanNodeId> {
    match response {
        AdviserResponse::NextStep { next_node_id }
        | AdviserResponse::IgnoreFailure { next_node_id }
        | AdviserResponse::MarkSuccess { next_node_id } => next_node_id.as_ref(),
        AdviserResponse::RollbackStart { rollback_node_id } => Some(rollback_node_id),
        _ => None,
    }
}

/// Statuses the engine always advises on
fn awaits_advice(status: Status) -> bool {
    matches!(
        status,
        Status::Succeeded | Status::Failed | Status::Expired | Status::Skipped
    )
}

/// Whether `node` can no longer lead to more work at its level.
///
/// A claimed successor or retry counts as pending until its record exists
/// in `known`; the record itself is then judged on its own.
fn is_settled(node: &NodeExecution, known: &HashSet<&NodeExecutionId>) -> bool {
    if node.status.is_live() {
        return false;
    }
    let successors = [&node.next_id, &node.new_retry_id];
    if successors.into_iter().flatten().any(|id| !known.contains(id)) {
        return false;
    }
    node.is_advised() || !awaits_advice(node.status)
}

/// Append an interrupt record for a status change about to happen
pub(crate) fn stamp(node: &mut NodeExecution, interrupt: Option<&Interrupt>, to: Status, at: DateTime<Utc>) {
    if let Some(interrupt) = interrupt {
        node.record_interrupt(InterruptRecord {
            interrupt_id: interrupt.uuid.clone(),
            interrupt_type: interrupt.interrupt_type,
            from_status: node.status,
            to_status: to,
            at,
        });
    }
}

impl OrchestrationEngine {
    // ── Advising ─────────────────────────────────────────────────────

    pub(crate) async fn on_advise(&self, id: &NodeExecutionId, status: Status) -> OrchestrationResult<()> {
        let node = self.executions.node(id).await?;
        if node.is_advised() || node.is_retried() || node.status != status {
            tracing::debug!(node_execution_id = %id, status = %node.status, "Advise skipped");
            return Ok(());
        }

        let no_parameters = Value::Null;
        let event = AdvisingEvent {
            ambiance: &node.ambiance,
            plan_node: node.plan_node.as_ref(),
            status,
            failure_info: node.failure_info.as_ref(),
            retry_ids: &node.retry_ids,
            parameters: &no_parameters,
        };
        let response = match adviser::advise(&self.registries, event) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(node_execution_id = %id, error = %err, "Adviser failed");
                let failure =
                    FailureInfo::engine(format!("advising {} failed: {}", node.plan_node_id(), err));
                return self.abandon_plan(&node, failure).await;
            }
        };

        let next_id = successor_of(&response).map(|_| NodeExecutionId::generate());
        let retry_id = matches!(response, AdviserResponse::Retry { .. }).then(NodeExecutionId::generate);
        let claimed = self
            .executions
            .update_node_if(id, |n| {
                if n.is_advised() || n.is_retried() || n.status != status {
                    return false;
                }
                n.adviser_response = Some(response.clone());
                if let Some(next_id) = &next_id {
                    n.next_id = Some(next_id.clone());
                }
                if let Some(retry_id) = &retry_id {
                    n.new_retry_id = Some(retry_id.clone());
                }
                true
            })
            .await?;
        let Some(node) = claimed else {
            return Ok(());
        };

        tracing::info!(
            node_execution_id = %id,
            plan_node_id = %node.plan_node_id(),
            status = %status,
            advice = response.kind(),
            "Node advised"
        );
        self.apply_advice(&node, response).await
    }

    async fn apply_advice(&self, node: &NodeExecution, response: AdviserResponse) -> OrchestrationResult<()> {
        match response {
            AdviserResponse::NextStep { next_node_id } => {
                self.continue_with(node, next_node_id.as_ref()).await
            }
            AdviserResponse::RollbackStart { rollback_node_id } => {
                self.continue_with(node, Some(&rollback_node_id)).await
            }
            AdviserResponse::EndPlan => self.end_plan(node).await,
            AdviserResponse::Retry {
                wait,
                retry_parameters,
            } => self.create_retry(node, wait, retry_parameters).await,
            AdviserResponse::IgnoreFailure { next_node_id } => {
                self.override_status(node, Status::IgnoreFailed, next_node_id.as_ref())
                    .await
            }
            AdviserResponse::MarkSuccess { next_node_id } => {
                self.override_status(node, Status::Succeeded, next_node_id.as_ref())
                    .await
            }
            AdviserResponse::InterventionWait { timeout, .. } => {
                let waiting = self
                    .executions
                    .transition(
                        &node.uuid,
                        &[Status::Failed, Status::Expired],
                        Status::InterventionWaiting,
                        |_| {},
                    )
                    .await?;
                match waiting {
                    Some(_) => {
                        tracing::info!(
                            node_execution_id = %node.uuid,
                            timeout = ?timeout,
                            "Waiting for intervention"
                        );
                        self.events.send_after(
                            EngineEvent::InterventionTimeout {
                                node_execution_id: node.uuid.clone(),
                            },
                            timeout,
                        )
                    }
                    None => self.end_transition(node).await,
                }
            }
            AdviserResponse::Fail => self.end_transition(node).await,
        }
    }

    async fn override_status(
        &self,
        node: &NodeExecution,
        to: Status,
        next_node_id: Option<&PlanNodeId>,
    ) -> OrchestrationResult<()> {
        let updated = self
            .executions
            .transition(&node.uuid, &[Status::Failed, Status::Expired], to, |_| {})
            .await?;
        let node = updated.unwrap_or_else(|| node.clone());
        self.continue_with(&node, next_node_id).await
    }

    /// Start the claimed successor, or end the chain when there is none
    async fn continue_with(&self, node: &NodeExecution, next_node_id: Option<&PlanNodeId>) -> OrchestrationResult<()> {
        match (next_node_id, &node.next_id) {
            (Some(plan_node_id), Some(id)) => {
                self.create_successor(node, plan_node_id, id.clone()).await
            }
            _ => self.end_transition(node).await,
        }
    }

    // ── Successors ───────────────────────────────────────────────────

    /// Queue the next node of `previous`'s chain under a claimed id
    pub(crate) async fn create_successor(
        &self,
        previous: &NodeExecution,
        plan_node_id: &PlanNodeId,
        id: NodeExecutionId,
    ) -> OrchestrationResult<()> {
        let plan_node = self
            .plan_node(previous.plan_execution_id(), plan_node_id)
            .await?;
        let ambiance = previous.ambiance.sibling(Level::new(id.clone(), &plan_node));
        let mut next = NodeExecution::new(id.clone(), ambiance, plan_node, self.clock.now());
        next.parent_id = previous.parent_id.clone();
        next.previous_id = Some(previous.uuid.clone());
        next.notify_id = previous.notify_id.clone();
        self.executions.create_node(next).await?;

        tracing::debug!(
            node_execution_id = %id,
            previous = %previous.uuid,
            plan_node_id = %plan_node_id,
            "Next node queued"
        );
        self.events.send(EngineEvent::Facilitate {
            node_execution_id: id,
        })
    }

    /// Queue the claimed retry of `node` after `wait`
    pub(crate) async fn create_retry(
        &self,
        node: &NodeExecution,
        wait: Duration,
        retry_parameters: Option<Value>,
    ) -> OrchestrationResult<()> {
        let Some(id) = node.new_retry_id.clone() else {
            return Ok(());
        };
        let plan_node = match retry_parameters {
            Some(parameters) => Arc::new(node.plan_node.clone_for_retry(parameters)),
            None => node.plan_node.clone(),
        };

        let mut retry = NodeExecution::new(
            id.clone(),
            node.ambiance.for_retry(id.clone()),
            plan_node,
            self.clock.now(),
        );
        retry.parent_id = node.parent_id.clone();
        retry.previous_id = node.previous_id.clone();
        retry.notify_id = node.notify_id.clone();
        retry.old_retry_id = Some(node.uuid.clone());
        retry.retry_ids = node.retry_ids.clone();
        retry.retry_ids.push(node.uuid.clone());
        let attempt = retry.retry_ids.len();
        self.executions.create_node(retry).await?;

        tracing::info!(
            node_execution_id = %id,
            replaces = %node.uuid,
            attempt,
            wait = ?wait,
            "Node retry queued"
        );
        self.events.send_after(
            EngineEvent::Facilitate {
                node_execution_id: id,
            },
            wait,
        )
    }

    // ── Chain and plan ends ──────────────────────────────────────────

    /// The chain `node` belongs to has ended
    pub(crate) async fn end_transition(&self, node: &NodeExecution) -> OrchestrationResult<()> {
        match (&node.parent_id, &node.notify_id) {
            (Some(parent_id), Some(notify_id)) => {
                let chain: Vec<NodeExecution> = self
                    .executions
                    .children(parent_id)
                    .await?
                    .into_iter()
                    .filter(|n| n.notify_id.as_ref() == Some(notify_id) && !n.is_retried())
                    .collect();
                if chain.iter().any(|n| n.status.is_live()) {
                    return Ok(());
                }

                let status = aggregate_status(chain.iter().map(|n| n.status));
                let failure_info = if status.is_positive() {
                    None
                } else {
                    chain.iter().find_map(|n| n.failure_info.clone())
                };
                let head = chain
                    .iter()
                    .find(|n| n.previous_id.is_none())
                    .unwrap_or(node);

                tracing::debug!(
                    node_execution_id = %node.uuid,
                    parent = %parent_id,
                    status = %status,
                    "Chain finished; notifying parent"
                );
                self.events.send(EngineEvent::Response {
                    correlation_id: notify_id.clone(),
                    payload: ResponseData::StepNotify(StepResponseNotifyData {
                        node_execution_id: Some(head.uuid.clone()),
                        plan_node_id: head.plan_node_id().clone(),
                        status,
                        failure_info,
                    }),
                })
            }
            _ => self.try_finalize_plan(node.plan_execution_id()).await,
        }
    }

    /// Finish the plan once every root-level chain has settled
    async fn try_finalize_plan(&self, plan_execution_id: &PlanExecutionId) -> OrchestrationResult<()> {
        let nodes = self.executions.nodes_of(plan_execution_id).await?;
        let roots: Vec<&NodeExecution> = nodes.iter().filter(|n| n.parent_id.is_none()).collect();
        let known: HashSet<&NodeExecutionId> = roots.iter().map(|n| &n.uuid).collect();
        if !roots.iter().all(|n| is_settled(n, &known)) {
            return Ok(());
        }

        let current: Vec<&NodeExecution> = roots.into_iter().filter(|n| !n.is_retried()).collect();
        let status = aggregate_status(current.iter().map(|n| n.status));
        let failure_info = if status.is_positive() {
            None
        } else {
            current.iter().find_map(|n| n.failure_info.clone())
        };
        self.finalize_plan(plan_execution_id, status, failure_info)
            .await
    }

    pub(crate) async fn finalize_plan(
        &self,
        plan_execution_id: &PlanExecutionId,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> OrchestrationResult<()> {
        if !status.is_final() {
            tracing::warn!(plan_execution_id = %plan_execution_id, status = %status, "Plan not finalized");
            return Ok(());
        }
        let finished = self
            .executions
            .update_plan_if(plan_execution_id, |plan| {
                // an abort in progress decides the final status itself
                if plan.status.is_final()
                    || (plan.status == Status::Discontinuing && status != Status::Aborted)
                {
                    return false;
                }
                plan.status = status;
                plan.failure_info = failure_info.clone();
                true
            })
            .await?;
        if finished.is_some() {
            tracing::info!(plan_execution_id = %plan_execution_id, status = %status, "Plan execution finished");
            self.events.send_after(
                EngineEvent::PruneCorrelations {
                    plan_execution_id: plan_execution_id.clone(),
                },
                self.config.correlation_retention(),
            )?;
        }
        Ok(())
    }

    /// End the whole plan with `node`'s result and discontinue the rest
    pub(crate) async fn end_plan(&self, node: &NodeExecution) -> OrchestrationResult<()> {
        let status = aggregate_status([node.status]);
        self.end_plan_with(node.plan_execution_id(), status, node.failure_info.clone())
            .await
    }

    /// Fail the plan because `node`'s chain cannot continue
    pub(crate) async fn abandon_plan(&self, node: &NodeExecution, failure: FailureInfo) -> OrchestrationResult<()> {
        // settled, so a later advise of this node is a no-op
        self.executions
            .update_node_if(&node.uuid, |n| {
                if n.status.is_live() || n.is_advised() {
                    return false;
                }
                n.adviser_response = Some(AdviserResponse::EndPlan);
                true
            })
            .await?;
        tracing::error!(
            node_execution_id = %node.uuid,
            plan_execution_id = %node.plan_execution_id(),
            reason = %failure.message,
            "Plan abandoned"
        );
        self.end_plan_with(node.plan_execution_id(), Status::Failed, Some(failure))
            .await
    }

    async fn end_plan_with(
        &self,
        plan_execution_id: &PlanExecutionId,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> OrchestrationResult<()> {
        self.finalize_plan(plan_execution_id, status, failure_info)
            .await?;

        for other in self.executions.nodes_of(plan_execution_id).await? {
            if other.parent_id.is_none() && other.status.is_live() && !other.is_retried() {
                self.cancel_subtree(&other.uuid, Status::Discontinued, false, None)
                    .await?;
            }
        }
        Ok(())
    }

    // ── Intervention ─────────────────────────────────────────────────

    /// Resolve an intervention wait with `action`
    pub(crate) async fn resolve_intervention(
        &self,
        id: &NodeExecutionId,
        action: RepairAction,
        interrupt: Option<&Interrupt>,
    ) -> OrchestrationResult<Option<InterruptEffect>> {
        let node = self.executions.node(id).await?;
        if node.status != Status::InterventionWaiting {
            return Ok(None);
        }
        let next_node_id = match &node.adviser_response {
            Some(AdviserResponse::InterventionWait { next_node_id, .. }) => next_node_id.clone(),
            _ => None,
        };
        let (to, continues) = match action {
            RepairAction::Ignore => (Status::IgnoreFailed, true),
            RepairAction::MarkAsSuccess => (Status::Succeeded, true),
            RepairAction::MarkAsFailure | RepairAction::EndExecution => (Status::Failed, false),
        };
        let successor = match (&next_node_id, continues) {
            (Some(_), true) => Some(NodeExecutionId::generate()),
            _ => None,
        };

        let now = self.clock.now();
        let resolved = self
            .executions
            .transition(id, &[Status::InterventionWaiting], to, |n| {
                stamp(n, interrupt, to, now);
                if let Some(successor) = &successor {
                    n.next_id = Some(successor.clone());
                }
            })
            .await?;
        let Some(resolved) = resolved else {
            return Ok(None);
        };

        tracing::info!(node_execution_id = %id, action = ?action, to = %to, "Intervention resolved");
        match (action, &next_node_id, successor) {
            (RepairAction::EndExecution, _, _) => self.end_plan(&resolved).await?,
            (_, Some(plan_node_id), Some(successor)) => {
                self.create_successor(&resolved, plan_node_id, successor)
                    .await?
            }
            _ => self.end_transition(&resolved).await?,
        }
        Ok(Some(InterruptEffect {
            node_execution_id: id.clone(),
            from_status: Status::InterventionWaiting,
            to_status: to,
            took_effect_at: now,
        }))
    }

    pub(crate) async fn on_intervention_timeout(&self, id: &NodeExecutionId) -> OrchestrationResult<()> {
        let node = self.executions.node(id).await?;
        if node.status != Status::InterventionWaiting {
            return Ok(());
        }
        let action = match &node.adviser_response {
            Some(AdviserResponse::InterventionWait { repair_action, .. }) => *repair_action,
            _ => RepairAction::MarkAsFailure,
        };
        tracing::info!(node_execution_id = %id, action = ?action, "Intervention wait timed out");
        self.resolve_intervention(id, action, None).await?;
        Ok(())
    }
}
