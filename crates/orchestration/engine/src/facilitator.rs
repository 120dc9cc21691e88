//! Facilitators: decide how a node runs
//!
//! A node's first facilitator obtainment decides its mode. A node with no
//! obtainments runs in the first mode its step supports.

use crate::registry::Registries;
use crate::step::Step;
use async_trait::async_trait;
use orchestration_types::{
    Ambiance, ExecutionMode, FacilitatorResponse, OrchestrationError, OrchestrationResult,
    PlanNode,
};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Chooses an execution mode and initial wait for a node
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn facilitate(
        &self,
        ambiance: &Ambiance,
        step_parameters: &Value,
        parameters: &Value,
    ) -> OrchestrationResult<FacilitatorResponse>;

    /// Reject parameters `facilitate` would refuse
    fn validate_parameters(&self, _parameters: &Value) -> OrchestrationResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorParameters {
    initial_wait_secs: Option<f64>,
}

/// Built-in facilitator that always picks one mode
#[derive(Clone, Copy, Debug)]
pub struct ModeFacilitator {
    mode: ExecutionMode,
}

impl ModeFacilitator {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn initial_wait(parameters: &Value) -> OrchestrationResult<Option<Duration>> {
        if parameters.is_null() {
            return Ok(None);
        }
        let params: FacilitatorParameters = serde_json::from_value(parameters.clone())
            .map_err(|err| OrchestrationError::InvalidPlan(format!("malformed facilitator parameters: {}", err)))?;
        match params.initial_wait_secs {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|err| OrchestrationError::InvalidPlan(format!("initialWaitSecs {}: {}", secs, err))),
            Some(secs) => Err(OrchestrationError::InvalidPlan(format!(
                "initialWaitSecs must be a non-negative number, got {}",
                secs
            ))),
        }
    }
}

#[async_trait]
impl Facilitator for ModeFacilitator {
    async fn facilitate(
        &self,
        _ambiance: &Ambiance,
        _step_parameters: &Value,
        parameters: &Value,
    ) -> OrchestrationResult<FacilitatorResponse> {
        let mut response = FacilitatorResponse::new(self.mode);
        if let Some(wait) = Self::initial_wait(parameters)? {
            response = response.with_initial_wait(wait);
        }
        Ok(response)
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        Self::initial_wait(parameters).map(|_| ())
    }
}

/// Whether `step` can run in `mode`
pub fn supports_mode(step: &dyn Step, mode: ExecutionMode) -> bool {
    match mode {
        ExecutionMode::Sync => step.as_sync().is_some(),
        ExecutionMode::Async => step.as_async().is_some(),
        ExecutionMode::Task => step.as_task().is_some(),
        ExecutionMode::TaskChain => step.as_task_chain().is_some(),
        ExecutionMode::Child => step.as_child().is_some(),
        ExecutionMode::Children => step.as_children().is_some(),
        ExecutionMode::ChildChain => step.as_child_chain().is_some(),
    }
}

/// First mode `step` supports, in declaration order
pub fn default_mode(step: &dyn Step) -> Option<ExecutionMode> {
    [
        ExecutionMode::Sync,
        ExecutionMode::Async,
        ExecutionMode::Task,
        ExecutionMode::TaskChain,
        ExecutionMode::Child,
        ExecutionMode::Children,
        ExecutionMode::ChildChain,
    ]
    .into_iter()
    .find(|mode| supports_mode(step, *mode))
}

/// Run facilitation for `plan_node` and check the step supports the result
pub async fn facilitate_node(
    registries: &Registries,
    ambiance: &Ambiance,
    plan_node: &PlanNode,
) -> OrchestrationResult<FacilitatorResponse> {
    let step = registries.steps.obtain(&plan_node.step_type)?;

    let response = match plan_node.facilitator_obtainments.first() {
        Some(obtainment) => {
            registries
                .facilitators
                .obtain(&obtainment.facilitator_type)?
                .facilitate(ambiance, &plan_node.step_parameters, &obtainment.parameters)
                .await?
        }
        None => {
            let mode = default_mode(step.as_ref())
                .ok_or_else(|| OrchestrationError::NoFacilitation(plan_node.uuid.clone()))?;
            FacilitatorResponse::new(mode)
        }
    };

    if !supports_mode(step.as_ref(), response.execution_mode) {
        return Err(OrchestrationError::UnsupportedMode {
            step_type: plan_node.step_type.clone(),
            mode: response.execution_mode,
        });
    }
    Ok(response)
}
