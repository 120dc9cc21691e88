//! Advisers: decide what happens after a node finishes
//!
//! Each adviser obtainment on a node is consulted in declaration order. The
//! first adviser whose [`Adviser::can_advise`] accepts the finished status
//! produces the [`AdviserResponse`]. When none accepts, a positive status
//! ends the chain normally and anything else ends it with the failure.
//!
//! Advising is a pure function of the [`AdvisingEvent`]: the same event and
//! parameters always produce the same response.

mod builtin;
mod retry;

pub use builtin::{
    AbortAdviser, IgnoreAdviser, ManualInterventionAdviser, MarkSuccessAdviser, OnFailAdviser,
    OnSuccessAdviser, RollbackAdviser,
};
pub use retry::{RetryAdviser, RetryExhaustedAction};

use crate::registry::Registries;
use orchestration_types::{
    AdviserResponse, Ambiance, FailureInfo, FailureType, NodeExecutionId, OrchestrationError,
    OrchestrationResult, PlanNode, PlanNodeId, Status,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// What an adviser sees about a finished node
#[derive(Clone, Copy, Debug)]
pub struct AdvisingEvent<'a> {
    pub ambiance: &'a Ambiance,
    pub plan_node: &'a PlanNode,
    pub status: Status,
    pub failure_info: Option<&'a FailureInfo>,
    /// Earlier attempts of this node, oldest first
    pub retry_ids: &'a [NodeExecutionId],
    /// This adviser's obtainment parameters
    pub parameters: &'a Value,
}

impl<'a> AdvisingEvent<'a> {
    pub fn with_parameters(self, parameters: &'a Value) -> Self {
        Self { parameters, ..self }
    }

    /// The failure matches `filter`; an empty filter matches any failure
    pub fn failure_matches(&self, filter: &[FailureType]) -> bool {
        match self.failure_info {
            Some(info) => info.matches_any(filter),
            None => filter.is_empty(),
        }
    }
}

/// A post-completion policy
pub trait Adviser: Send + Sync {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool;

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse>;

    /// Reject parameters this adviser could not act on
    fn validate_parameters(&self, _parameters: &Value) -> OrchestrationResult<()> {
        Ok(())
    }

    /// Plan nodes named in `parameters`; checked when a plan is validated
    fn referenced_nodes(&self, _parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        Ok(Vec::new())
    }
}

/// Consult the node's advisers in order
pub fn advise(registries: &Registries, event: AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
    for obtainment in &event.plan_node.adviser_obtainments {
        let adviser = registries.advisers.obtain(&obtainment.adviser_type)?;
        let event = event.with_parameters(&obtainment.parameters);
        if adviser.can_advise(&event) {
            let response = adviser.on_advise_event(&event)?;
            tracing::debug!(
                plan_node_id = %event.plan_node.uuid,
                adviser = %obtainment.adviser_type,
                response = response.kind(),
                "Adviser responded"
            );
            return Ok(response);
        }
    }
    Ok(default_advice(event.status))
}

/// Advice when no adviser accepts the event
pub fn default_advice(status: Status) -> AdviserResponse {
    if status.is_positive() {
        AdviserResponse::NextStep { next_node_id: None }
    } else {
        AdviserResponse::Fail
    }
}

// ── Parameters ───────────────────────────────────────────────────────

/// Parameters understood by most built-in advisers
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommonParameters {
    #[serde(default)]
    pub next_node_id: Option<PlanNodeId>,
    #[serde(default)]
    pub failure_types: Vec<FailureType>,
}

pub(crate) fn parse_parameters<T>(parameters: &Value) -> OrchestrationResult<T>
where
    T: DeserializeOwned + Default,
{
    if parameters.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(parameters.clone())
        .map_err(|err| OrchestrationError::InvalidPlan(format!("malformed adviser parameters: {}", err)))
}

/// `nextNodeId` out of raw parameters
pub(crate) fn next_node_of(parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
    let params: CommonParameters = parse_parameters(parameters)?;
    Ok(params.next_node_id.into_iter().collect())
}
