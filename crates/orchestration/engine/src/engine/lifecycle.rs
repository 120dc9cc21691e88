//! Facilitation, invocation, response handling and conclusion

use super::OrchestrationEngine;
use crate::facilitator::facilitate_node;
use crate::resolver::OutputScope;
use crate::step::{AsyncResponse, ChildChainLink, StepContext, StepInputPackage};
use crate::waiter::{NotifyOutcome, WaitRegistration};
use orchestration_types::{
    ChildSlot, CorrelationId, EngineEvent, ExecutableResponse, ExecutionMode, FailureInfo,
    FailureType, Level, NodeExecution, NodeExecutionId, OrchestrationError, OrchestrationResult,
    PendingResumption, PlanExecutionId, PlanNode, PlanNodeId, RefType, ResponseData,
    ResponseDataMap, Status, StepError, StepResponse, StepResponseNotifyData, StepResult,
    TaskChainLink,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a skip condition reads
fn skip_decision(condition: Option<&str>) -> Result<bool, FailureInfo> {
    match condition.map(str::trim) {
        None | Some("") => Ok(false),
        Some(c) if c.eq_ignore_ascii_case("true") => Ok(true),
        Some(c) if c.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(FailureInfo::engine(format!(
            "unsupported skip condition: {}",
            other
        ))),
    }
}

impl OrchestrationEngine {
    // ── Facilitation ─────────────────────────────────────────────────

    pub(crate) async fn on_facilitate(&self, id: &NodeExecutionId) -> OrchestrationResult<()> {
        let node = self.executions.node(id).await?;
        let plan = self.executions.plan(node.plan_execution_id()).await?;

        if plan.status.is_final() || plan.status == Status::Discontinuing {
            self.cancel_subtree(id, Status::Discontinued, false, None).await?;
            return Ok(());
        }
        if let Some(parent_id) = &node.parent_id {
            let parent = self.executions.node(parent_id).await?;
            if parent.status.is_final() || parent.status == Status::Discontinuing {
                self.cancel_subtree(id, Status::Discontinued, false, None).await?;
                return Ok(());
            }
        }

        match node.status {
            Status::Queued => {}
            // resumed after a pause
            Status::Running => return self.facilitate(node).await,
            status => {
                tracing::debug!(node_execution_id = %id, status = %status, "Facilitation skipped");
                return Ok(());
            }
        }

        if plan.status == Status::Paused {
            let parked = self
                .executions
                .transition(id, &[Status::Queued], Status::Paused, |n| {
                    n.pending = Some(PendingResumption::Facilitate)
                })
                .await?;
            // the plan may have resumed before this node parked
            let plan = self.executions.plan(node.plan_execution_id()).await?;
            if parked.is_some() && plan.status == Status::Running {
                self.resume_node(id, None).await?;
            }
            return Ok(());
        }

        match self
            .executions
            .transition(id, &[Status::Queued], Status::Running, |_| {})
            .await?
        {
            Some(node) => self.facilitate(node).await,
            None => Ok(()),
        }
    }

    async fn facilitate(&self, node: NodeExecution) -> OrchestrationResult<()> {
        let id = &node.uuid;
        match skip_decision(node.plan_node.skip_condition.as_deref()) {
            Ok(true) => {
                if self
                    .executions
                    .transition(id, &[Status::Running], Status::Skipped, |_| {})
                    .await?
                    .is_some()
                {
                    self.events.send(EngineEvent::Advise {
                        node_execution_id: id.clone(),
                        status: Status::Skipped,
                    })?;
                }
                return Ok(());
            }
            Ok(false) => {}
            Err(failure) => return self.fail_before_start(id, failure).await,
        }

        match facilitate_node(&self.registries, &node.ambiance, &node.plan_node).await {
            Ok(response) => {
                let mode = response.execution_mode;
                let facilitated = self
                    .executions
                    .transition(id, &[Status::Running], Status::Facilitating, |n| {
                        n.mode = Some(mode)
                    })
                    .await?;
                if facilitated.is_some() {
                    tracing::debug!(
                        node_execution_id = %id,
                        mode = %mode,
                        initial_wait = ?response.initial_wait,
                        "Node facilitated"
                    );
                    self.events.send_after(
                        EngineEvent::Start {
                            node_execution_id: id.clone(),
                        },
                        response.initial_wait,
                    )?;
                }
                Ok(())
            }
            Err(err) => {
                let failure = StepError::from(err).into_failure_info();
                self.fail_before_start(id, failure).await
            }
        }
    }

    async fn fail_before_start(&self, id: &NodeExecutionId, failure: FailureInfo) -> OrchestrationResult<()> {
        tracing::warn!(node_execution_id = %id, reason = %failure.message, "Node failed before start");
        let failed = self
            .executions
            .transition(id, &[Status::Running], Status::Failed, |n| {
                n.failure_info = Some(failure.clone())
            })
            .await?;
        if failed.is_some() {
            self.events.send(EngineEvent::Advise {
                node_execution_id: id.clone(),
                status: Status::Failed,
            })?;
        }
        Ok(())
    }

    // ── Invocation ───────────────────────────────────────────────────

    pub(crate) async fn on_start(&self, id: &NodeExecutionId) -> OrchestrationResult<()> {
        let Some(node) = self
            .executions
            .transition(id, &[Status::Facilitating], Status::Executing, |_| {})
            .await?
        else {
            return Ok(());
        };

        let outcome = match self.register_timeouts(node).await {
            Ok(node) => match node.mode {
                Some(mode) => match self.context(&node).await {
                    Ok(ctx) => self.invoke(&node, mode, &ctx).await,
                    Err(err) => Err(err.into()),
                },
                None => Err(StepError::failed(
                    "node started without an execution mode",
                    FailureType::Engine,
                )),
            },
            Err(err) => Err(err.into()),
        };
        self.settle(id, outcome).await
    }

    /// Conclude now, stay suspended, or fail with the step error
    async fn settle(
        &self,
        id: &NodeExecutionId,
        outcome: StepResult<Option<StepResponse>>,
    ) -> OrchestrationResult<()> {
        match outcome {
            Ok(Some(response)) => self.conclude(id, response).await,
            Ok(None) => Ok(()),
            Err(err) => {
                let failure = err.into_failure_info();
                tracing::warn!(node_execution_id = %id, reason = %failure.message, "Step failed");
                self.conclude(id, StepResponse::failed(failure)).await
            }
        }
    }

    async fn register_timeouts(&self, node: NodeExecution) -> OrchestrationResult<NodeExecution> {
        let obtainments = &node.plan_node.timeout_obtainments;
        if obtainments.is_empty() {
            return Ok(node);
        }

        let now = self.clock.instant();
        let mut trackers = Vec::with_capacity(obtainments.len());
        for obtainment in obtainments {
            let factory = self.registries.timeouts.obtain(&obtainment.dimension)?;
            trackers.push(factory.create(&obtainment.parameters, now)?);
        }
        let ids: Vec<_> = trackers
            .into_iter()
            .map(|tracker| self.timeouts.register(&node.uuid, tracker))
            .collect();

        self.executions
            .update_node(&node.uuid, |n| n.timeout_instance_ids.extend(ids.iter().cloned()))
            .await
    }

    async fn context(&self, node: &NodeExecution) -> OrchestrationResult<StepContext> {
        let inputs =
            StepInputPackage::resolve(&self.registries, &node.ambiance, &node.plan_node).await?;
        Ok(self.context_with(node, inputs))
    }

    pub(crate) fn context_with(&self, node: &NodeExecution, inputs: StepInputPackage) -> StepContext {
        StepContext::new(
            node.ambiance.clone(),
            node.plan_node.clone(),
            inputs,
            self.registries.clone(),
        )
    }

    /// Invoke the step in `mode`; `None` means it is waiting on responses
    async fn invoke(
        &self,
        node: &NodeExecution,
        mode: ExecutionMode,
        ctx: &StepContext,
    ) -> StepResult<Option<StepResponse>> {
        let step = self.registries.steps.obtain(node.step_type())?.clone();
        let unsupported = || OrchestrationError::UnsupportedMode {
            step_type: node.step_type().clone(),
            mode,
        };

        match mode {
            ExecutionMode::Sync => {
                let executable = step.as_sync().ok_or_else(unsupported)?;
                let response = executable.execute_sync(ctx).await?;
                self.record(&node.uuid, ExecutableResponse::Sync).await?;
                Ok(Some(response))
            }
            ExecutionMode::Async => {
                let executable = step.as_async().ok_or_else(unsupported)?;
                let AsyncResponse { callback_ids } = executable.execute_async(ctx).await?;
                self.record(
                    &node.uuid,
                    ExecutableResponse::Async {
                        callback_ids: callback_ids.clone(),
                    },
                )
                .await?;
                if callback_ids.is_empty() {
                    let response = executable
                        .handle_async_response(ctx, &ResponseDataMap::new())
                        .await?;
                    return Ok(Some(response));
                }
                self.await_responses(node, callback_ids, false).await?;
                Ok(None)
            }
            ExecutionMode::Task => {
                let executable = step.as_task().ok_or_else(unsupported)?;
                let task = executable.obtain_task(ctx).await?;
                let task_type = task.task_type.clone();
                let task_id = self
                    .task_executor
                    .queue_task(&node.ambiance.setup_abstractions, task)
                    .await?;
                let correlation_id = CorrelationId::from(&task_id);
                self.record(&node.uuid, ExecutableResponse::Task { task_id, task_type })
                    .await?;
                self.await_responses(node, vec![correlation_id], false)
                    .await?;
                Ok(None)
            }
            ExecutionMode::TaskChain => {
                let executable = step.as_task_chain().ok_or_else(unsupported)?;
                let link = executable.start_chain_link(ctx).await?;
                self.dispatch_chain_link(node, link).await?;
                Ok(None)
            }
            ExecutionMode::Child => {
                let executable = step.as_child().ok_or_else(unsupported)?;
                let request = executable.obtain_child(ctx).await?;
                self.publish_child_inputs(node, &request.additional_inputs)
                    .await?;

                let child_execution_id = NodeExecutionId::generate();
                let notify_id = CorrelationId::generate();
                self.create_child(
                    node,
                    &request.child_node_id,
                    child_execution_id.clone(),
                    notify_id.clone(),
                )
                .await?;
                self.record(
                    &node.uuid,
                    ExecutableResponse::Child {
                        child_node_id: request.child_node_id,
                        child_execution_id: child_execution_id.clone(),
                        notify_id: notify_id.clone(),
                    },
                )
                .await?;
                self.await_responses(node, vec![notify_id], false)
                    .await?;
                self.events.send(EngineEvent::Facilitate {
                    node_execution_id: child_execution_id,
                })?;
                Ok(None)
            }
            ExecutionMode::Children => {
                let executable = step.as_children().ok_or_else(unsupported)?;
                let request = executable.obtain_children(ctx).await?;
                let fail_fast = request.fail_fast;
                let max_concurrency = request.max_concurrency;

                if request.children.is_empty() {
                    self.record(
                        &node.uuid,
                        ExecutableResponse::Children {
                            children: Vec::new(),
                            fail_fast,
                            max_concurrency,
                        },
                    )
                    .await?;
                    return Ok(Some(StepResponse::success()));
                }

                let limit = max_concurrency
                    .unwrap_or(request.children.len())
                    .max(1);
                let mut slots: Vec<ChildSlot> =
                    request.children.into_iter().map(ChildSlot::new).collect();
                let mut started = Vec::new();
                for slot in slots.iter_mut().take(limit) {
                    let id = NodeExecutionId::generate();
                    slot.node_execution_id = Some(id.clone());
                    started.push((slot.plan_node_id.clone(), id, slot.notify_id.clone()));
                }
                for (plan_node_id, id, notify_id) in &started {
                    self.create_child(node, plan_node_id, id.clone(), notify_id.clone())
                        .await?;
                }

                let notify_ids = slots.iter().map(|s| s.notify_id.clone()).collect();
                self.record(
                    &node.uuid,
                    ExecutableResponse::Children {
                        children: slots,
                        fail_fast,
                        max_concurrency,
                    },
                )
                .await?;
                self.await_responses(node, notify_ids, true).await?;

                for (_, node_execution_id, _) in started {
                    self.events
                        .send(EngineEvent::Facilitate { node_execution_id })?;
                }
                Ok(None)
            }
            ExecutionMode::ChildChain => {
                let executable = step.as_child_chain().ok_or_else(unsupported)?;
                let link = executable.start_child_chain(ctx).await?;
                self.spawn_chain_link(node, link).await?;
                Ok(None)
            }
        }
    }

    async fn record(&self, id: &NodeExecutionId, response: ExecutableResponse) -> OrchestrationResult<()> {
        self.executions
            .update_node(id, |n| n.executable_responses.push(response.clone()))
            .await?;
        Ok(())
    }

    /// Register a wait; resume right away when every id already answered
    async fn await_responses(
        &self,
        node: &NodeExecution,
        correlation_ids: Vec<CorrelationId>,
        progress: bool,
    ) -> OrchestrationResult<()> {
        let registration = self
            .waiter
            .wait_for_all(&node.uuid, node.plan_execution_id(), correlation_ids, progress)
            .await?;
        match registration {
            WaitRegistration::Ready(responses) => self.events.send(EngineEvent::Resume {
                node_execution_id: node.uuid.clone(),
                responses,
            }),
            WaitRegistration::Pending => Ok(()),
        }
    }

    async fn dispatch_chain_link(&self, node: &NodeExecution, link: TaskChainLink) -> OrchestrationResult<()> {
        let task_type = link.task.task_type.clone();
        let task_id = self
            .task_executor
            .queue_task(&node.ambiance.setup_abstractions, link.task)
            .await?;
        let correlation_id = CorrelationId::from(&task_id);
        tracing::debug!(
            node_execution_id = %node.uuid,
            task_id = %task_id,
            chain_end = link.chain_end,
            "Task chain link dispatched"
        );
        self.record(
            &node.uuid,
            ExecutableResponse::TaskChain {
                task_id,
                task_type,
                chain_end: link.chain_end,
                pass_through: link.pass_through,
            },
        )
        .await?;
        self.await_responses(node, vec![correlation_id], false)
            .await
    }

    async fn spawn_chain_link(&self, node: &NodeExecution, link: ChildChainLink) -> OrchestrationResult<()> {
        let child_execution_id = NodeExecutionId::generate();
        let notify_id = CorrelationId::generate();
        self.create_child(
            node,
            &link.child_node_id,
            child_execution_id.clone(),
            notify_id.clone(),
        )
        .await?;
        self.record(
            &node.uuid,
            ExecutableResponse::ChildChain {
                child_node_id: link.child_node_id,
                child_execution_id: child_execution_id.clone(),
                notify_id: notify_id.clone(),
                last_link: link.last_link,
                pass_through: link.pass_through,
            },
        )
        .await?;
        self.await_responses(node, vec![notify_id], false)
            .await?;
        self.events.send(EngineEvent::Facilitate {
            node_execution_id: child_execution_id,
        })
    }

    // ── Children ─────────────────────────────────────────────────────

    pub(crate) async fn plan_node(
        &self,
        plan_execution_id: &PlanExecutionId,
        plan_node_id: &PlanNodeId,
    ) -> OrchestrationResult<Arc<PlanNode>> {
        let plan = self.executions.plan(plan_execution_id).await?;
        Ok(plan.plan.node(plan_node_id)?.clone())
    }

    async fn create_child(
        &self,
        parent: &NodeExecution,
        plan_node_id: &PlanNodeId,
        id: NodeExecutionId,
        notify_id: CorrelationId,
    ) -> OrchestrationResult<()> {
        let plan_node = self
            .plan_node(parent.plan_execution_id(), plan_node_id)
            .await?;
        let ambiance = parent.ambiance.fork(Level::new(id.clone(), &plan_node));
        let mut child = NodeExecution::new(id, ambiance, plan_node, self.clock.now());
        child.parent_id = Some(parent.uuid.clone());
        child.notify_id = Some(notify_id);
        self.executions.create_node(child).await
    }

    /// Values a parent hands to its child, visible only beneath the parent
    async fn publish_child_inputs(
        &self,
        node: &NodeExecution,
        inputs: &BTreeMap<String, Value>,
    ) -> OrchestrationResult<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let resolver = self.registries.resolvers.obtain(&RefType::SWEEPING_OUTPUT)?;
        for (name, value) in inputs {
            resolver
                .consume(&node.ambiance, name, value.clone(), OutputScope::Descendants)
                .await?;
        }
        Ok(())
    }

    async fn on_child_progress(
        &self,
        parent_id: &NodeExecutionId,
        correlation_id: &CorrelationId,
        data: &ResponseData,
    ) -> OrchestrationResult<()> {
        let parent = self.executions.node(parent_id).await?;
        if !matches!(parent.status, Status::Executing | Status::Pausing) {
            return Ok(());
        }
        let Some(ExecutableResponse::Children { fail_fast, .. }) = parent.last_executable_response()
        else {
            return Ok(());
        };

        let positive = data
            .as_step_notify()
            .map(|notify| notify.status.is_positive())
            .unwrap_or(false);
        if *fail_fast && !positive {
            self.fail_fast(&parent, correlation_id).await
        } else {
            self.start_next_child(&parent).await
        }
    }

    async fn start_next_child(&self, parent: &NodeExecution) -> OrchestrationResult<()> {
        let mut next = None;
        self.executions
            .update_node_if(&parent.uuid, |n| {
                next = None;
                let Some(ExecutableResponse::Children { children, .. }) =
                    n.executable_responses.last_mut()
                else {
                    return false;
                };
                let Some(slot) = children.iter_mut().find(|slot| slot.is_pending()) else {
                    return false;
                };
                let id = NodeExecutionId::generate();
                slot.node_execution_id = Some(id.clone());
                next = Some((slot.plan_node_id.clone(), id, slot.notify_id.clone()));
                true
            })
            .await?;

        let Some((plan_node_id, id, notify_id)) = next else {
            return Ok(());
        };
        self.create_child(parent, &plan_node_id, id.clone(), notify_id)
            .await?;
        self.events.send(EngineEvent::Facilitate {
            node_execution_id: id,
        })
    }

    /// Cancel unstarted children and discontinue the running ones
    async fn fail_fast(&self, parent: &NodeExecution, failed: &CorrelationId) -> OrchestrationResult<()> {
        let mut cancelled: Vec<ChildSlot> = Vec::new();
        let mut running: Vec<CorrelationId> = Vec::new();
        self.executions
            .update_node_if(&parent.uuid, |n| {
                cancelled.clear();
                running.clear();
                let Some(ExecutableResponse::Children { children, .. }) =
                    n.executable_responses.last_mut()
                else {
                    return false;
                };
                for slot in children.iter_mut() {
                    if slot.is_pending() {
                        slot.cancelled = true;
                        cancelled.push(slot.clone());
                    } else if slot.node_execution_id.is_some() && &slot.notify_id != failed {
                        running.push(slot.notify_id.clone());
                    }
                }
                !cancelled.is_empty()
            })
            .await?;

        tracing::info!(
            node_execution_id = %parent.uuid,
            cancelled = cancelled.len(),
            "Failing fast"
        );
        for slot in cancelled {
            self.events.send(EngineEvent::Response {
                correlation_id: slot.notify_id,
                payload: ResponseData::StepNotify(StepResponseNotifyData {
                    node_execution_id: None,
                    plan_node_id: slot.plan_node_id,
                    status: Status::Discontinued,
                    failure_info: None,
                }),
            })?;
        }

        for child in self.executions.children(&parent.uuid).await? {
            let in_flight = child.status.is_live()
                && !child.is_retried()
                && child
                    .notify_id
                    .as_ref()
                    .is_some_and(|notify_id| running.contains(notify_id));
            if in_flight {
                self.cancel_subtree(&child.uuid, Status::Discontinued, true, None)
                    .await?;
            }
        }
        Ok(())
    }

    // ── Responses ────────────────────────────────────────────────────

    pub(crate) async fn on_response(
        &self,
        correlation_id: CorrelationId,
        payload: ResponseData,
    ) -> OrchestrationResult<()> {
        match self.waiter.notify(correlation_id, payload).await? {
            NotifyOutcome::Completed {
                node_execution_id,
                responses,
            } => self.events.send(EngineEvent::Resume {
                node_execution_id,
                responses,
            }),
            NotifyOutcome::Progress {
                node_execution_id,
                correlation_id,
                data,
            } => {
                self.on_child_progress(&node_execution_id, &correlation_id, &data)
                    .await
            }
            NotifyOutcome::Recorded | NotifyOutcome::Buffered | NotifyOutcome::Dropped => Ok(()),
        }
    }

    pub(crate) async fn on_resume(
        &self,
        id: &NodeExecutionId,
        responses: ResponseDataMap,
    ) -> OrchestrationResult<()> {
        let node = self.executions.node(id).await?;
        match node.status {
            Status::Executing => {}
            Status::Pausing => {
                let parked = self
                    .executions
                    .transition(id, &[Status::Pausing], Status::Paused, |n| {
                        n.pending = Some(PendingResumption::Resume {
                            responses: responses.clone(),
                        })
                    })
                    .await?;
                if parked.is_none() {
                    // resumed in between; deliver again
                    self.events.send(EngineEvent::Resume {
                        node_execution_id: id.clone(),
                        responses,
                    })?;
                }
                return Ok(());
            }
            status => {
                tracing::debug!(node_execution_id = %id, status = %status, "Responses dropped");
                return Ok(());
            }
        }

        let outcome = match self.context(&node).await {
            Ok(ctx) => self.handle_responses(&node, &ctx, &responses).await,
            Err(err) => Err(err.into()),
        };
        self.settle(id, outcome).await
    }

    async fn handle_responses(
        &self,
        node: &NodeExecution,
        ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<Option<StepResponse>> {
        let step = self.registries.steps.obtain(node.step_type())?.clone();
        let Some(last) = node.last_executable_response() else {
            return Err(StepError::failed(
                "responses arrived before any invocation was recorded",
                FailureType::Engine,
            ));
        };
        let unsupported = |mode| OrchestrationError::UnsupportedMode {
            step_type: node.step_type().clone(),
            mode,
        };

        match last {
            ExecutableResponse::Sync => Err(StepError::failed(
                "responses delivered to a sync invocation",
                FailureType::Engine,
            )),
            ExecutableResponse::Async { .. } => {
                let executable = step
                    .as_async()
                    .ok_or_else(|| unsupported(ExecutionMode::Async))?;
                Ok(Some(executable.handle_async_response(ctx, responses).await?))
            }
            ExecutableResponse::Task { .. } => {
                let executable = step
                    .as_task()
                    .ok_or_else(|| unsupported(ExecutionMode::Task))?;
                Ok(Some(executable.handle_task_result(ctx, responses).await?))
            }
            ExecutableResponse::TaskChain {
                chain_end,
                pass_through,
                ..
            } => {
                let executable = step
                    .as_task_chain()
                    .ok_or_else(|| unsupported(ExecutionMode::TaskChain))?;
                let errored = responses.values().any(|r| r.failure_info().is_some());
                if *chain_end || errored {
                    return Ok(Some(
                        executable
                            .finalize_chain(ctx, pass_through, responses)
                            .await?,
                    ));
                }
                let link = executable
                    .next_chain_link(ctx, pass_through, responses)
                    .await?;
                self.dispatch_chain_link(node, link).await?;
                Ok(None)
            }
            ExecutableResponse::Child { .. } => {
                let executable = step
                    .as_child()
                    .ok_or_else(|| unsupported(ExecutionMode::Child))?;
                Ok(Some(executable.handle_child_response(ctx, responses).await?))
            }
            ExecutableResponse::Children { .. } => {
                let executable = step
                    .as_children()
                    .ok_or_else(|| unsupported(ExecutionMode::Children))?;
                Ok(Some(
                    executable.handle_children_response(ctx, responses).await?,
                ))
            }
            ExecutableResponse::ChildChain {
                last_link,
                pass_through,
                ..
            } => {
                let executable = step
                    .as_child_chain()
                    .ok_or_else(|| unsupported(ExecutionMode::ChildChain))?;
                let positive = responses
                    .values()
                    .filter_map(ResponseData::as_step_notify)
                    .all(|notify| notify.status.is_positive());
                if *last_link || !positive {
                    return Ok(Some(
                        executable
                            .finalize_child_chain(ctx, pass_through, responses)
                            .await?,
                    ));
                }
                let link = executable
                    .next_child_link(ctx, pass_through, responses)
                    .await?;
                self.spawn_chain_link(node, link).await?;
                Ok(None)
            }
        }
    }

    // ── Conclusion ───────────────────────────────────────────────────

    /// Record the step's final response and hand the node to its advisers
    pub(crate) async fn conclude(&self, id: &NodeExecutionId, response: StepResponse) -> OrchestrationResult<()> {
        let status = match response.status {
            Status::Succeeded | Status::Failed | Status::Expired => response.status,
            Status::Aborted => {
                self.cancel_subtree(id, Status::Aborted, true, None).await?;
                return Ok(());
            }
            status if status.is_positive() => Status::Succeeded,
            status => {
                tracing::warn!(
                    node_execution_id = %id,
                    status = %status,
                    "Step returned a status it cannot finish with; failing"
                );
                Status::Failed
            }
        };
        let failure_info = if status.is_positive() {
            None
        } else {
            Some(response.failure_info.clone().unwrap_or_else(|| {
                FailureInfo::application(format!("step finished {}", response.status))
            }))
        };

        for _ in 0..self.config.max_update_attempts.max(1) {
            let concluded = self
                .executions
                .transition(id, &[Status::Executing], status, |n| {
                    n.failure_info = failure_info.clone()
                })
                .await?;
            if let Some(node) = concluded {
                self.timeouts.cancel_all(&node.timeout_instance_ids);
                if status.is_positive() {
                    self.publish_outcomes(&node, &response).await;
                }
                return self.events.send(EngineEvent::Advise {
                    node_execution_id: id.clone(),
                    status,
                });
            }

            // a pause landed while the step ran
            let parked = self
                .executions
                .transition(id, &[Status::Pausing], Status::Paused, |n| {
                    n.pending = Some(PendingResumption::Conclude {
                        response: response.clone(),
                    })
                })
                .await?;
            if parked.is_some() {
                return Ok(());
            }

            let current = self.executions.node(id).await?;
            if !matches!(current.status, Status::Executing | Status::Pausing) {
                tracing::debug!(
                    node_execution_id = %id,
                    status = %current.status,
                    "Conclusion dropped"
                );
                return Ok(());
            }
        }
        Err(OrchestrationError::ConcurrentModification(id.to_string()))
    }

    async fn publish_outcomes(&self, node: &NodeExecution, response: &StepResponse) {
        if response.outcomes.is_empty() {
            return;
        }
        let resolver = match self.registries.resolvers.obtain(&RefType::OUTCOME) {
            Ok(resolver) => resolver,
            Err(err) => {
                tracing::warn!(error = %err, "Outcomes not published");
                return;
            }
        };
        for outcome in &response.outcomes {
            let scope = OutputScope::from_group(outcome.group.as_deref());
            if let Err(err) = resolver
                .consume(&node.ambiance, &outcome.name, outcome.outcome.clone(), scope)
                .await
            {
                tracing::warn!(
                    node_execution_id = %node.uuid,
                    outcome = %outcome.name,
                    error = %err,
                    "Outcome not published"
                );
            }
        }
    }
}
