//! Plan validation against the registries
//!
//! Runs before a plan execution is created, so configuration problems
//! surface at submission rather than midway through a run.

use crate::registry::Registries;
use orchestration_types::{OrchestrationError, OrchestrationResult, Plan, PlanNodeId};

/// Check that `plan` is well formed and only uses registered keys
pub fn validate_plan(plan: &Plan, registries: &Registries) -> OrchestrationResult<()> {
    plan.validate()?;

    for node in plan.nodes() {
        let step = registries.steps.obtain(&node.step_type)?;
        for id in step.referenced_nodes(&node.step_parameters) {
            ensure_node(plan, &node.uuid, &id)?;
        }

        for obtainment in &node.facilitator_obtainments {
            registries
                .facilitators
                .obtain(&obtainment.facilitator_type)?
                .validate_parameters(&obtainment.parameters)
                .map_err(|err| in_node(&node.uuid, err))?;
        }
        for obtainment in &node.adviser_obtainments {
            let adviser = registries.advisers.obtain(&obtainment.adviser_type)?;
            adviser
                .validate_parameters(&obtainment.parameters)
                .map_err(|err| in_node(&node.uuid, err))?;
            let referenced = adviser
                .referenced_nodes(&obtainment.parameters)
                .map_err(|err| in_node(&node.uuid, err))?;
            for id in referenced {
                ensure_node(plan, &node.uuid, &id)?;
            }
        }
        for obtainment in &node.timeout_obtainments {
            registries
                .timeouts
                .obtain(&obtainment.dimension)?
                .validate(&obtainment.parameters)
                .map_err(|err| in_node(&node.uuid, err))?;
        }
        for ref_object in &node.ref_objects {
            registries.resolvers.obtain(&ref_object.ref_type)?;
        }
    }
    Ok(())
}

/// Name the offending node in a parameter error
fn in_node(node: &PlanNodeId, err: OrchestrationError) -> OrchestrationError {
    match err {
        OrchestrationError::InvalidPlan(reason) => {
            OrchestrationError::InvalidPlan(format!("{}: {}", node, reason))
        }
        other => other,
    }
}

fn ensure_node(plan: &Plan, referrer: &PlanNodeId, id: &PlanNodeId) -> OrchestrationResult<()> {
    if plan.contains(id) {
        return Ok(());
    }
    Err(OrchestrationError::InvalidPlan(format!(
        "{} references unknown node {}",
        referrer, id
    )))
}
