//! Built-in advisers

use super::{next_node_of, parse_parameters, Adviser, AdvisingEvent, CommonParameters};
use orchestration_types::{
    AdviserResponse, FailureType, OrchestrationError, OrchestrationResult, PlanNodeId,
    RepairAction,
};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Accepts broken statuses whose failure passes the `failureTypes` filter
fn accepts_failure(event: &AdvisingEvent<'_>) -> bool {
    if !event.status.is_broken() {
        return false;
    }
    match parse_parameters::<CommonParameters>(event.parameters) {
        Ok(params) => event.failure_matches(&params.failure_types),
        Err(_) => true,
    }
}

// ── Success ──────────────────────────────────────────────────────────

/// Continues with `nextNodeId` after a positive status
pub struct OnSuccessAdviser;

impl Adviser for OnSuccessAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        event.status.is_positive()
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: CommonParameters = parse_parameters(event.parameters)?;
        Ok(AdviserResponse::NextStep {
            next_node_id: params.next_node_id,
        })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<CommonParameters>(parameters).map(|_| ())
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        next_node_of(parameters)
    }
}

// ── Failure ──────────────────────────────────────────────────────────

/// Routes a failure to `nextNodeId`, or fails the chain when absent
pub struct OnFailAdviser;

impl Adviser for OnFailAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        accepts_failure(event)
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: CommonParameters = parse_parameters(event.parameters)?;
        Ok(match params.next_node_id {
            Some(next) => AdviserResponse::NextStep {
                next_node_id: Some(next),
            },
            None => AdviserResponse::Fail,
        })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<CommonParameters>(parameters).map(|_| ())
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        next_node_of(parameters)
    }
}

/// Marks a matching failure `IGNORE_FAILED` and continues
pub struct IgnoreAdviser;

impl Adviser for IgnoreAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        accepts_failure(event)
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: CommonParameters = parse_parameters(event.parameters)?;
        Ok(AdviserResponse::IgnoreFailure {
            next_node_id: params.next_node_id,
        })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<CommonParameters>(parameters).map(|_| ())
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        next_node_of(parameters)
    }
}

/// Marks a matching failure `SUCCEEDED` and continues
pub struct MarkSuccessAdviser;

impl Adviser for MarkSuccessAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        accepts_failure(event)
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: CommonParameters = parse_parameters(event.parameters)?;
        Ok(AdviserResponse::MarkSuccess {
            next_node_id: params.next_node_id,
        })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<CommonParameters>(parameters).map(|_| ())
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        next_node_of(parameters)
    }
}

/// Ends the whole plan on a matching failure
pub struct AbortAdviser;

impl Adviser for AbortAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        accepts_failure(event)
    }

    fn on_advise_event(&self, _event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        Ok(AdviserResponse::EndPlan)
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<CommonParameters>(parameters).map(|_| ())
    }
}

// ── Manual Intervention ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualInterventionParameters {
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    repair_action: Option<RepairAction>,
    #[serde(default)]
    next_node_id: Option<PlanNodeId>,
    #[serde(default)]
    failure_types: Vec<FailureType>,
}

/// Parks a failed node until an operator decides, or the timeout elapses
pub struct ManualInterventionAdviser {
    default_timeout: Duration,
}

impl ManualInterventionAdviser {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Adviser for ManualInterventionAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        if !event.status.is_broken() {
            return false;
        }
        match parse_parameters::<ManualInterventionParameters>(event.parameters) {
            Ok(params) => event.failure_matches(&params.failure_types),
            Err(_) => true,
        }
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: ManualInterventionParameters = parse_parameters(event.parameters)?;
        Ok(AdviserResponse::InterventionWait {
            timeout: params
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_timeout),
            repair_action: params.repair_action.unwrap_or(RepairAction::MarkAsFailure),
            next_node_id: params.next_node_id,
        })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<ManualInterventionParameters>(parameters).map(|_| ())
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        next_node_of(parameters)
    }
}

// ── Rollback ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollbackParameters {
    rollback_node_id: Option<PlanNodeId>,
}

/// Starts the configured rollback node after a matching failure
pub struct RollbackAdviser;

impl Adviser for RollbackAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        accepts_failure(event)
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: RollbackParameters = parse_parameters(event.parameters)?;
        let rollback_node_id = params.rollback_node_id.ok_or_else(|| {
            OrchestrationError::InvalidPlan(format!(
                "rollback adviser on {} needs rollbackNodeId",
                event.plan_node.uuid
            ))
        })?;
        Ok(AdviserResponse::RollbackStart { rollback_node_id })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        let params: RollbackParameters = parse_parameters(parameters)?;
        match params.rollback_node_id {
            Some(_) => Ok(()),
            None => Err(OrchestrationError::InvalidPlan(
                "rollback adviser needs rollbackNodeId".to_string(),
            )),
        }
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        let params: RollbackParameters = parse_parameters(parameters)?;
        Ok(params.rollback_node_id.into_iter().collect())
    }
}
