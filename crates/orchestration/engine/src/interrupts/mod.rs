//! Interrupts
//!
//! Registration is synchronous: the target is checked against the current
//! state of the plan and either rejected or stored as `REGISTERED`.
//! Processing happens on a worker. It claims the interrupt by moving it to
//! `PROCESSING`, runs the handler for its type and records the outcome
//! together with every status change the handler caused.
//!
//! Timeouts use the same path. An expired timeout raises an internal
//! `EXPIRE` interrupt, so expiry shows up in a node's interrupt history
//! like any other control action.

mod handlers;

pub use handlers::{
    AbortHandler, ExpireHandler, InterventionHandler, PauseHandler, ResumeHandler, RetryHandler,
};

use crate::engine::OrchestrationEngine;
use crate::registry::Registry;
use crate::storage::InterruptStorage;
use async_trait::async_trait;
use orchestration_types::{
    EngineEvent, ExecutionMode, Interrupt, InterruptEffect, InterruptId, InterruptRequest,
    InterruptState, InterruptType, NodeExecution, NodeExecutionId, OrchestrationError,
    OrchestrationResult, Status, StorageError, TimeoutInstanceId,
};
use serde_json::json;
use std::sync::Arc;

/// Issuer recorded on interrupts raised by expired timeouts
pub const TIMEOUT_ISSUER: &str = "timeout-engine";

/// Applies one kind of interrupt
#[async_trait]
pub trait InterruptHandler: Send + Sync {
    /// Apply `interrupt`, returning the status changes it caused
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        interrupt: &Interrupt,
    ) -> OrchestrationResult<Vec<InterruptEffect>>;
}

/// Handlers for every interrupt type
pub(crate) fn default_handlers() -> OrchestrationResult<Registry<InterruptType, Arc<dyn InterruptHandler>>> {
    let mut handlers: Registry<InterruptType, Arc<dyn InterruptHandler>> = Registry::new("interrupt");
    let abort: Arc<dyn InterruptHandler> = Arc::new(AbortHandler);
    let pause: Arc<dyn InterruptHandler> = Arc::new(PauseHandler);
    let resume: Arc<dyn InterruptHandler> = Arc::new(ResumeHandler);
    let intervention: Arc<dyn InterruptHandler> = Arc::new(InterventionHandler);

    handlers.register(InterruptType::Abort, abort.clone())?;
    handlers.register(InterruptType::AbortAll, abort)?;
    handlers.register(InterruptType::Pause, pause.clone())?;
    handlers.register(InterruptType::PauseAll, pause)?;
    handlers.register(InterruptType::Resume, resume.clone())?;
    handlers.register(InterruptType::ResumeAll, resume)?;
    handlers.register(InterruptType::Retry, Arc::new(RetryHandler))?;
    handlers.register(InterruptType::MarkFailed, intervention.clone())?;
    handlers.register(InterruptType::MarkSuccess, intervention.clone())?;
    handlers.register(InterruptType::Ignore, intervention)?;
    handlers.register(InterruptType::Expire, Arc::new(ExpireHandler))?;
    Ok(handlers)
}

/// Whether `interrupt_type` can apply to `node` as it stands
fn check_target(interrupt_type: InterruptType, node: &NodeExecution) -> Result<(), String> {
    let status = node.status;
    if status.is_final() && interrupt_type != InterruptType::Retry {
        return Err(format!(
            "node execution {} already finished {}",
            node.uuid, status
        ));
    }

    let applies = match interrupt_type {
        InterruptType::Pause => {
            status.is_pausable() && !node.mode.is_some_and(ExecutionMode::spawns_children)
        }
        InterruptType::Resume => matches!(status, Status::Paused | Status::Pausing),
        InterruptType::Retry => {
            (status.is_broken() || status == Status::InterventionWaiting) && !node.is_retried()
        }
        InterruptType::MarkFailed | InterruptType::MarkSuccess | InterruptType::Ignore => {
            status == Status::InterventionWaiting
        }
        InterruptType::Abort
        | InterruptType::Expire
        | InterruptType::AbortAll
        | InterruptType::PauseAll
        | InterruptType::ResumeAll => true,
    };
    if applies {
        Ok(())
    } else {
        Err(format!(
            "{} does not apply to node execution {} in {}",
            interrupt_type, node.uuid, status
        ))
    }
}

impl OrchestrationEngine {
    /// Check and store an interrupt, then queue it for processing
    pub async fn register_interrupt(&self, request: InterruptRequest) -> OrchestrationResult<Interrupt> {
        let plan = self.executions.plan(&request.plan_execution_id).await?;
        if plan.status.is_final() {
            return Err(OrchestrationError::InterruptRejected(format!(
                "plan execution {} already finished {}",
                plan.uuid, plan.status
            )));
        }

        match &request.node_execution_id {
            None if request.interrupt_type.requires_node() => {
                return Err(OrchestrationError::InterruptRejected(format!(
                    "{} needs a node execution",
                    request.interrupt_type
                )));
            }
            None => {}
            Some(_) if request.interrupt_type.is_plan_wide() => {
                return Err(OrchestrationError::InterruptRejected(format!(
                    "{} applies to the whole plan execution",
                    request.interrupt_type
                )));
            }
            Some(node_id) => {
                let node = self.executions.node(node_id).await?;
                if node.plan_execution_id() != &plan.uuid {
                    return Err(OrchestrationError::InterruptRejected(format!(
                        "node execution {} belongs to another plan execution",
                        node_id
                    )));
                }
                check_target(request.interrupt_type, &node)
                    .map_err(OrchestrationError::InterruptRejected)?;
            }
        }

        let interrupt = Interrupt::from_request(request, self.clock.now());
        self.storage.create_interrupt(interrupt.clone()).await?;
        tracing::info!(
            interrupt_id = %interrupt.uuid,
            interrupt_type = %interrupt.interrupt_type,
            plan_execution_id = %interrupt.plan_execution_id,
            node_execution_id = ?interrupt.node_execution_id,
            "Interrupt registered"
        );
        self.events.send(EngineEvent::Interrupt {
            interrupt_id: interrupt.uuid.clone(),
        })?;
        Ok(interrupt)
    }

    pub(crate) async fn process_interrupt(&self, id: &InterruptId) -> OrchestrationResult<()> {
        let interrupt = self.interrupt(id).await?;
        if interrupt.state != InterruptState::Registered {
            return Ok(());
        }
        let mut claim = interrupt;
        claim.state = InterruptState::Processing;
        let interrupt = match self.storage.replace_interrupt(claim).await {
            Ok(interrupt) => interrupt,
            Err(StorageError::Conflict { .. }) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let result = match self.interrupt_handlers.obtain(&interrupt.interrupt_type) {
            Ok(handler) => handler.handle(self, &interrupt).await,
            Err(err) => Err(err),
        };

        let mut processed = interrupt;
        processed.processed_at = Some(self.clock.now());
        match result {
            Ok(effects) => {
                tracing::info!(
                    interrupt_id = %id,
                    interrupt_type = %processed.interrupt_type,
                    effects = effects.len(),
                    "Interrupt processed"
                );
                processed.state = InterruptState::ProcessedSuccessfully;
                processed.effects = effects;
            }
            Err(err) => {
                tracing::warn!(
                    interrupt_id = %id,
                    interrupt_type = %processed.interrupt_type,
                    error = %err,
                    "Interrupt failed"
                );
                processed.state = InterruptState::ProcessedUnsuccessfully;
                processed.failure_reason = Some(err.to_string());
            }
        }
        self.storage.replace_interrupt(processed).await?;
        Ok(())
    }

    /// An active timeout elapsed; expire its node through an interrupt
    pub(crate) async fn on_timeout_expired(
        &self,
        id: &NodeExecutionId,
        timeout_instance_id: &TimeoutInstanceId,
    ) -> OrchestrationResult<()> {
        let node = self.executions.node(id).await?;
        if !matches!(
            node.status,
            Status::Executing | Status::Pausing | Status::Paused
        ) {
            tracing::debug!(node_execution_id = %id, status = %node.status, "Late timeout ignored");
            return Ok(());
        }

        tracing::info!(
            node_execution_id = %id,
            timeout_instance_id = %timeout_instance_id,
            "Timeout expired"
        );
        let request = InterruptRequest::new(InterruptType::Expire, node.plan_execution_id().clone())
            .for_node(id.clone())
            .with_parameters(json!({ "timeoutInstanceId": timeout_instance_id.to_string() }))
            .issued_by(TIMEOUT_ISSUER);
        let interrupt = Interrupt::from_request(request, self.clock.now());
        self.storage.create_interrupt(interrupt.clone()).await?;
        self.process_interrupt(&interrupt.uuid).await
    }
}
