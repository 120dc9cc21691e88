//! Cancellation, pause, resume, expiry, retry on demand and recovery
//!
//! These are the status changes that arrive from outside the normal flow:
//! interrupts, timeouts and plan-wide endings. Cancellation walks a subtree
//! twice. The first pass claims every live node top-down by moving it to
//! `DISCONTINUING`, which stops new children from starting underneath it.
//! The second pass releases resources and settles each node bottom-up.

use super::advise::stamp;
use super::OrchestrationEngine;
use crate::step::StepInputPackage;
use crate::timeout::TimeoutEvent;
use orchestration_types::{
    CorrelationId, EngineEvent, ExecutableResponse, ExecutionMode, FailureInfo, Interrupt,
    InterruptEffect, NodeExecution, NodeExecutionId, OrchestrationError,
    OrchestrationResult, PendingResumption, PlanExecutionId, Status,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// How outstanding work of a node is stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Release {
    Abort,
    Expire,
}

fn spawns_children(node: &NodeExecution) -> bool {
    node.mode.is_some_and(ExecutionMode::spawns_children)
}

impl OrchestrationEngine {
    // ── Cancellation ─────────────────────────────────────────────────

    /// Stop `root` and every live node beneath it, ending each in
    /// `final_status`. With `notify_upward` the chain `root` belongs to is
    /// ended once it settles.
    pub(crate) async fn cancel_subtree(
        &self,
        root: &NodeExecutionId,
        final_status: Status,
        notify_upward: bool,
        interrupt: Option<&Interrupt>,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(id) = queue.pop_front() {
            let node = self.executions.node(&id).await?;
            if node.status.is_final() {
                continue;
            }
            for child in self.executions.children(&id).await? {
                if child.status.is_live() {
                    queue.push_back(child.uuid);
                }
            }
            order.push(id);
        }

        let now = self.clock.now();
        let mut claimed = Vec::new();
        for id in &order {
            let mut from = None;
            let node = self
                .executions
                .transition(
                    id,
                    Status::allowed_start_set(Status::Discontinuing),
                    Status::Discontinuing,
                    |n| {
                        from = Some(n.status);
                        stamp(n, interrupt, Status::Discontinuing, now);
                    },
                )
                .await?;
            if let (Some(node), Some(from)) = (node, from) {
                let outstanding = self.waiter.cancel_waits(id).await?;
                self.timeouts.cancel_all(&node.timeout_instance_ids);
                claimed.push((node, from, outstanding));
            }
        }

        let mut effects = Vec::new();
        for (node, from, outstanding) in claimed.into_iter().rev() {
            self.release(&node, &outstanding, Release::Abort).await;
            let settled = self
                .executions
                .transition(&node.uuid, &[Status::Discontinuing], final_status, |n| {
                    stamp(n, interrupt, final_status, now);
                    n.pending = None;
                })
                .await?;
            let Some(settled) = settled else {
                continue;
            };
            effects.push(InterruptEffect {
                node_execution_id: node.uuid.clone(),
                from_status: from,
                to_status: final_status,
                took_effect_at: now,
            });
            if notify_upward && settled.uuid == *root {
                self.end_transition(&settled).await?;
            }
        }

        if !effects.is_empty() {
            tracing::info!(
                node_execution_id = %root,
                status = %final_status,
                nodes = effects.len(),
                "Subtree cancelled"
            );
        }
        Ok(effects)
    }

    /// Stop the task or callbacks a node is still waiting on
    async fn release(&self, node: &NodeExecution, outstanding: &[CorrelationId], how: Release) {
        let setup = &node.ambiance.setup_abstractions;
        let last = node.last_executable_response();
        if let Some(task_id) = last.and_then(ExecutableResponse::task_id) {
            let stopped = match how {
                Release::Abort => self.task_executor.abort_task(setup, task_id).await,
                Release::Expire => self.task_executor.expire_task(setup, task_id).await,
            };
            if let Err(err) = stopped {
                tracing::warn!(
                    node_execution_id = %node.uuid,
                    task_id = %task_id,
                    error = %err,
                    "Task could not be stopped"
                );
            }
        }

        if !matches!(last, Some(ExecutableResponse::Async { .. })) || outstanding.is_empty() {
            return;
        }
        let Ok(step) = self.registries.steps.obtain(node.step_type()) else {
            return;
        };
        if let Some(executable) = step.as_async() {
            let ctx = self.context_with(node, StepInputPackage::new());
            executable.handle_abort(&ctx, outstanding).await;
        }
    }

    /// Abort every live node of a plan execution and finish it as aborted
    pub(crate) async fn abort_plan(
        &self,
        plan_execution_id: &PlanExecutionId,
        interrupt: Option<&Interrupt>,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        self.executions
            .update_plan_if(plan_execution_id, |plan| {
                if plan.status.is_final() || plan.status == Status::Discontinuing {
                    return false;
                }
                plan.status = Status::Discontinuing;
                true
            })
            .await?;

        let mut effects = Vec::new();
        for node in self.executions.nodes_of(plan_execution_id).await? {
            if node.parent_id.is_none() && node.status.is_live() {
                effects.extend(
                    self.cancel_subtree(&node.uuid, Status::Aborted, false, interrupt)
                        .await?,
                );
            }
        }
        self.finalize_plan(plan_execution_id, Status::Aborted, None)
            .await?;
        Ok(effects)
    }

    // ── Pause and resume ─────────────────────────────────────────────

    pub(crate) async fn pause_node(
        &self,
        id: &NodeExecutionId,
        interrupt: Option<&Interrupt>,
    ) -> OrchestrationResult<Option<InterruptEffect>> {
        let node = self.executions.node(id).await?;
        let (from_set, to): (&[Status], Status) = match node.status {
            Status::Queued | Status::Running | Status::Facilitating => (
                &[Status::Queued, Status::Running, Status::Facilitating],
                Status::Paused,
            ),
            Status::Executing => (&[Status::Executing], Status::Pausing),
            _ => return Ok(None),
        };

        let now = self.clock.now();
        let mut from = None;
        let paused = self
            .executions
            .transition(id, from_set, to, |n| {
                from = Some(n.status);
                stamp(n, interrupt, to, now);
                if to == Status::Paused {
                    n.pending = Some(PendingResumption::Facilitate);
                }
            })
            .await?;
        let (Some(paused), Some(from)) = (paused, from) else {
            return Ok(None);
        };

        self.timeouts
            .on_event(&paused.timeout_instance_ids, TimeoutEvent::Paused, self.clock.instant())
            .await;
        Ok(Some(InterruptEffect {
            node_execution_id: id.clone(),
            from_status: from,
            to_status: to,
            took_effect_at: now,
        }))
    }

    pub(crate) async fn resume_node(
        &self,
        id: &NodeExecutionId,
        interrupt: Option<&Interrupt>,
    ) -> OrchestrationResult<Option<InterruptEffect>> {
        let node = self.executions.node(id).await?;
        let now = self.clock.now();
        let effect = |from: Status, to: Status| InterruptEffect {
            node_execution_id: id.clone(),
            from_status: from,
            to_status: to,
            took_effect_at: now,
        };

        match node.status {
            Status::Pausing => {
                let resumed = self
                    .executions
                    .transition(id, &[Status::Pausing], Status::Executing, |n| {
                        stamp(n, interrupt, Status::Executing, now)
                    })
                    .await?;
                let Some(resumed) = resumed else {
                    return Ok(None);
                };
                self.timeouts
                    .on_event(&resumed.timeout_instance_ids, TimeoutEvent::Resumed, self.clock.instant())
                    .await;
                Ok(Some(effect(Status::Pausing, Status::Executing)))
            }
            Status::Paused => {
                let mut pending = None;
                let resumed = self
                    .executions
                    .transition(id, &[Status::Paused], Status::Running, |n| {
                        stamp(n, interrupt, Status::Running, now);
                        pending = n.pending.take();
                    })
                    .await?;
                let Some(resumed) = resumed else {
                    return Ok(None);
                };
                self.timeouts
                    .on_event(&resumed.timeout_instance_ids, TimeoutEvent::Resumed, self.clock.instant())
                    .await;

                match pending {
                    None | Some(PendingResumption::Facilitate) => {
                        self.events.send(EngineEvent::Facilitate {
                            node_execution_id: id.clone(),
                        })?;
                    }
                    Some(PendingResumption::Resume { responses }) => {
                        self.executions
                            .transition(id, &[Status::Running], Status::Executing, |_| {})
                            .await?;
                        self.events.send(EngineEvent::Resume {
                            node_execution_id: id.clone(),
                            responses,
                        })?;
                    }
                    Some(PendingResumption::Conclude { response }) => {
                        self.executions
                            .transition(id, &[Status::Running], Status::Executing, |_| {})
                            .await?;
                        self.conclude(id, response).await?;
                    }
                }
                Ok(Some(effect(Status::Paused, Status::Running)))
            }
            _ => Ok(None),
        }
    }

    pub(crate) async fn pause_plan(
        &self,
        plan_execution_id: &PlanExecutionId,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        let paused = self
            .executions
            .update_plan_if(plan_execution_id, |plan| {
                if plan.status != Status::Running {
                    return false;
                }
                plan.status = Status::Paused;
                true
            })
            .await?;
        if paused.is_none() {
            return Err(OrchestrationError::InterruptRejected(format!(
                "plan execution {} is not running",
                plan_execution_id
            )));
        }

        let mut effects = Vec::new();
        for node in self.executions.nodes_of(plan_execution_id).await? {
            if node.status.is_pausable() && !spawns_children(&node) {
                effects.extend(self.pause_node(&node.uuid, Some(interrupt)).await?);
            }
        }
        Ok(effects)
    }

    pub(crate) async fn resume_plan(
        &self,
        plan_execution_id: &PlanExecutionId,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        let resumed = self
            .executions
            .update_plan_if(plan_execution_id, |plan| {
                if plan.status != Status::Paused {
                    return false;
                }
                plan.status = Status::Running;
                true
            })
            .await?;
        if resumed.is_none() {
            return Err(OrchestrationError::InterruptRejected(format!(
                "plan execution {} is not paused",
                plan_execution_id
            )));
        }

        let mut effects = Vec::new();
        for node in self.executions.nodes_of(plan_execution_id).await? {
            if matches!(node.status, Status::Paused | Status::Pausing) {
                effects.extend(self.resume_node(&node.uuid, Some(interrupt)).await?);
            }
        }
        Ok(effects)
    }

    // ── Expiry ───────────────────────────────────────────────────────

    /// Expire a node that is executing or waiting on intervention
    pub(crate) async fn expire_node(
        &self,
        id: &NodeExecutionId,
        interrupt: Option<&Interrupt>,
    ) -> OrchestrationResult<Option<InterruptEffect>> {
        let node = self.executions.node(id).await?;
        let now = self.clock.now();
        let from = node.status;

        match from {
            Status::InterventionWaiting => {
                let expired = self
                    .executions
                    .transition(id, &[Status::InterventionWaiting], Status::Expired, |n| {
                        stamp(n, interrupt, Status::Expired, now)
                    })
                    .await?;
                let Some(expired) = expired else {
                    return Ok(None);
                };
                self.end_transition(&expired).await?;
            }
            Status::Executing | Status::Pausing | Status::Paused => {
                let outstanding = self.waiter.cancel_waits(id).await?;
                self.timeouts.cancel_all(&node.timeout_instance_ids);
                self.release(&node, &outstanding, Release::Expire).await;
                for child in self.executions.children(id).await? {
                    if child.status.is_live() {
                        self.cancel_subtree(&child.uuid, Status::Discontinued, false, interrupt)
                            .await?;
                    }
                }

                let failure = FailureInfo::timeout(format!(
                    "{} expired while {}",
                    node.plan_node_id(),
                    from
                ));
                let expired = self
                    .executions
                    .transition(
                        id,
                        &[Status::Executing, Status::Pausing, Status::Paused],
                        Status::Expired,
                        |n| {
                            stamp(n, interrupt, Status::Expired, now);
                            n.failure_info = Some(failure.clone());
                            n.pending = None;
                        },
                    )
                    .await?;
                if expired.is_none() {
                    return Ok(None);
                }
                self.events.send(EngineEvent::Advise {
                    node_execution_id: id.clone(),
                    status: Status::Expired,
                })?;
            }
            _ => return Ok(None),
        }

        Ok(Some(InterruptEffect {
            node_execution_id: id.clone(),
            from_status: from,
            to_status: Status::Expired,
            took_effect_at: now,
        }))
    }

    // ── Retry on demand ──────────────────────────────────────────────

    /// Retry a failed node, or one waiting on intervention, right away.
    ///
    /// A node below a parent is only retried while the parent still waits
    /// on its chain; the parent's wait is then re-keyed so the new attempt
    /// can report again.
    pub(crate) async fn retry_node(
        &self,
        id: &NodeExecutionId,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Option<InterruptEffect>> {
        let node = self.executions.node(id).await?;
        let from = node.status;
        let plan = self.executions.plan(node.plan_execution_id()).await?;
        if node.parent_id.is_none() && plan.status.is_final() {
            return Err(OrchestrationError::InterruptRejected(format!(
                "plan execution {} already finished",
                node.plan_execution_id()
            )));
        }
        let retry_id = NodeExecutionId::generate();
        let now = self.clock.now();

        let claimed = if from == Status::InterventionWaiting {
            self.executions
                .transition(id, &[Status::InterventionWaiting], Status::Failed, |n| {
                    stamp(n, Some(interrupt), Status::Failed, now);
                    n.new_retry_id = Some(retry_id.clone());
                })
                .await?
        } else {
            self.executions
                .update_node_if(id, |n| {
                    if n.is_retried() || !n.status.is_broken() {
                        return false;
                    }
                    let status = n.status;
                    stamp(n, Some(interrupt), status, now);
                    n.new_retry_id = Some(retry_id.clone());
                    true
                })
                .await?
        };
        let Some(mut node) = claimed else {
            return Ok(None);
        };

        if let (Some(parent_id), Some(previous)) = (node.parent_id.clone(), node.notify_id.clone()) {
            let replacement = CorrelationId::generate();
            if !self.waiter.reopen(&parent_id, &previous, replacement.clone()).await? {
                self.executions
                    .update_node_if(id, |n| {
                        if n.new_retry_id.as_ref() != Some(&retry_id) {
                            return false;
                        }
                        n.new_retry_id = None;
                        true
                    })
                    .await?;
                return Err(OrchestrationError::InterruptRejected(format!(
                    "parent {} no longer waits on node execution {}",
                    parent_id, id
                )));
            }
            self.rekey_chain(&parent_id, &previous, &replacement).await?;
            node = self.executions.node(id).await?;
        }

        let parameters = match &interrupt.parameters {
            Value::Null => None,
            parameters => Some(parameters.clone()),
        };
        self.create_retry(&node, Duration::ZERO, parameters).await?;
        Ok(Some(InterruptEffect {
            node_execution_id: id.clone(),
            from_status: from,
            to_status: node.status,
            took_effect_at: now,
        }))
    }

    /// Point a parent's chain and its record of it at a new notify id
    async fn rekey_chain(
        &self,
        parent_id: &NodeExecutionId,
        previous: &CorrelationId,
        replacement: &CorrelationId,
    ) -> OrchestrationResult<()> {
        for member in self.executions.children(parent_id).await? {
            if member.notify_id.as_ref() == Some(previous) {
                self.executions
                    .update_node(&member.uuid, |n| n.notify_id = Some(replacement.clone()))
                    .await?;
            }
        }
        self.executions
            .update_node(parent_id, |n| {
                for response in n.executable_responses.iter_mut() {
                    match response {
                        ExecutableResponse::Children { children, .. } => {
                            for slot in children.iter_mut().filter(|s| &s.notify_id == previous) {
                                slot.notify_id = replacement.clone();
                            }
                        }
                        ExecutableResponse::Child { notify_id, .. }
                        | ExecutableResponse::ChildChain { notify_id, .. }
                            if notify_id == previous =>
                        {
                            *notify_id = replacement.clone();
                        }
                        _ => {}
                    }
                }
            })
            .await?;
        Ok(())
    }

    // ── Recovery ─────────────────────────────────────────────────────

    /// Fail a node whose event could not be handled and have it advised.
    ///
    /// A node that already finished ends its plan instead, since nothing
    /// else will move its chain along.
    pub(crate) async fn fail_on_error(
        &self,
        id: &NodeExecutionId,
        err: &OrchestrationError,
    ) -> OrchestrationResult<()> {
        if matches!(err, OrchestrationError::QueueClosed) {
            return Ok(());
        }
        let mut node = self.executions.node(id).await?;
        if self.executions.plan(node.plan_execution_id()).await?.status.is_final() {
            return Ok(());
        }
        let failure = FailureInfo::engine(err.to_string());

        if node.status == Status::Queued {
            match self
                .executions
                .transition(id, &[Status::Queued], Status::Running, |_| {})
                .await?
            {
                Some(running) => node = running,
                None => return Ok(()),
            }
        }

        match node.status {
            Status::Running | Status::Facilitating | Status::Executing => {
                let outstanding = self.waiter.cancel_waits(id).await?;
                self.timeouts.cancel_all(&node.timeout_instance_ids);
                self.release(&node, &outstanding, Release::Abort).await;
                for child in self.executions.children(id).await? {
                    if child.status.is_live() {
                        self.cancel_subtree(&child.uuid, Status::Discontinued, false, None)
                            .await?;
                    }
                }

                let failed = self
                    .executions
                    .transition(
                        id,
                        &[Status::Running, Status::Facilitating, Status::Executing],
                        Status::Failed,
                        |n| {
                            n.failure_info = Some(failure.clone());
                            n.pending = None;
                        },
                    )
                    .await?;
                if failed.is_none() {
                    return Ok(());
                }
                tracing::warn!(
                    node_execution_id = %id,
                    reason = %failure.message,
                    "Node failed by the engine"
                );
                self.events.send(EngineEvent::Advise {
                    node_execution_id: id.clone(),
                    status: Status::Failed,
                })
            }
            status if status.is_final() => self.abandon_plan(&node, failure).await,
            _ => Ok(()),
        }
    }
}
