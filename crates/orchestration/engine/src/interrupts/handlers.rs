//! Built-in interrupt handlers

use super::InterruptHandler;
use crate::engine::OrchestrationEngine;
use async_trait::async_trait;
use orchestration_types::{
    Interrupt, InterruptEffect, InterruptType, NodeExecutionId, OrchestrationError,
    OrchestrationResult, RepairAction, Status,
};

fn target(interrupt: &Interrupt) -> OrchestrationResult<&NodeExecutionId> {
    interrupt.node_execution_id.as_ref().ok_or_else(|| {
        OrchestrationError::InterruptRejected(format!(
            "{} needs a node execution",
            interrupt.interrupt_type
        ))
    })
}

/// One effect, or a rejection when the node moved on in the meantime
fn single(
    effect: Option<InterruptEffect>,
    interrupt: &Interrupt,
    id: &NodeExecutionId,
) -> OrchestrationResult<Vec<InterruptEffect>> {
    effect.map(|e| vec![e]).ok_or_else(|| {
        OrchestrationError::InterruptRejected(format!(
            "{} no longer applies to node execution {}",
            interrupt.interrupt_type, id
        ))
    })
}

/// `ABORT` and `ABORT_ALL`
pub struct AbortHandler;

#[async_trait]
impl InterruptHandler for AbortHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        if interrupt.is_plan_wide() {
            return engine
                .abort_plan(&interrupt.plan_execution_id, Some(interrupt))
                .await;
        }
        let id = target(interrupt)?;
        let effects = engine
            .cancel_subtree(id, Status::Aborted, true, Some(interrupt))
            .await?;
        if effects.is_empty() {
            return single(None, interrupt, id);
        }
        Ok(effects)
    }
}

/// `PAUSE` and `PAUSE_ALL`
pub struct PauseHandler;

#[async_trait]
impl InterruptHandler for PauseHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        if interrupt.is_plan_wide() {
            return engine
                .pause_plan(&interrupt.plan_execution_id, interrupt)
                .await;
        }
        let id = target(interrupt)?;
        single(engine.pause_node(id, Some(interrupt)).await?, interrupt, id)
    }
}

/// `RESUME` and `RESUME_ALL`
pub struct ResumeHandler;

#[async_trait]
impl InterruptHandler for ResumeHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        if interrupt.is_plan_wide() {
            return engine
                .resume_plan(&interrupt.plan_execution_id, interrupt)
                .await;
        }
        let id = target(interrupt)?;
        single(engine.resume_node(id, Some(interrupt)).await?, interrupt, id)
    }
}

/// `RETRY`; the interrupt parameters, when present, replace the step
/// parameters of the new attempt
pub struct RetryHandler;

#[async_trait]
impl InterruptHandler for RetryHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        let id = target(interrupt)?;
        single(engine.retry_node(id, interrupt).await?, interrupt, id)
    }
}

/// `MARK_FAILED`, `MARK_SUCCESS` and `IGNORE` on a node waiting for
/// intervention
pub struct InterventionHandler;

#[async_trait]
impl InterruptHandler for InterventionHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        let id = target(interrupt)?;
        let action = match interrupt.interrupt_type {
            InterruptType::MarkFailed => RepairAction::MarkAsFailure,
            InterruptType::MarkSuccess => RepairAction::MarkAsSuccess,
            InterruptType::Ignore => RepairAction::Ignore,
            other => {
                return Err(OrchestrationError::InterruptRejected(format!(
                    "{} is not an intervention",
                    other
                )))
            }
        };
        single(
            engine.resolve_intervention(id, action, Some(interrupt)).await?,
            interrupt,
            id,
        )
    }
}

/// `EXPIRE`, raised by timeouts or by hand
pub struct ExpireHandler;

#[async_trait]
impl InterruptHandler for ExpireHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>> {
        let id = target(interrupt)?;
        single(engine.expire_node(id, Some(interrupt)).await?, interrupt, id)
    }
}
