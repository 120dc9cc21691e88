//! Retry adviser

use super::{parse_parameters, Adviser, AdvisingEvent};
use orchestration_types::{
    AdviserResponse, FailureType, OrchestrationResult, PlanNodeId, RepairAction,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// What to do once every retry has been used
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryExhaustedAction {
    #[default]
    Fail,
    Ignore,
    MarkSuccess,
    EndPlan,
    ManualIntervention,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryParameters {
    #[serde(default)]
    retry_count: u32,
    /// Wait before each attempt; the last entry repeats
    #[serde(default)]
    wait_interval_secs: Vec<u64>,
    #[serde(default)]
    failure_types: Vec<FailureType>,
    #[serde(default)]
    repair_action_after_retries: RetryExhaustedAction,
    #[serde(default)]
    next_node_id: Option<PlanNodeId>,
    /// Replacement step parameters for the retried attempts
    #[serde(default)]
    retry_parameters: Option<Value>,
}

/// Retries a matching failure up to `retryCount` times
pub struct RetryAdviser {
    default_wait: Duration,
    intervention_timeout: Duration,
}

impl RetryAdviser {
    pub fn new(default_wait: Duration, intervention_timeout: Duration) -> Self {
        Self {
            default_wait,
            intervention_timeout,
        }
    }

    fn wait_for_attempt(&self, intervals: &[u64], attempt: usize) -> Duration {
        match intervals {
            [] => self.default_wait,
            _ => Duration::from_secs(intervals[attempt.min(intervals.len() - 1)]),
        }
    }
}

impl Adviser for RetryAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        if !event.status.is_broken() {
            return false;
        }
        match parse_parameters::<RetryParameters>(event.parameters) {
            Ok(params) => event.failure_matches(&params.failure_types),
            Err(_) => true,
        }
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        let params: RetryParameters = parse_parameters(event.parameters)?;
        let attempt = event.retry_ids.len();

        if attempt < params.retry_count as usize {
            return Ok(AdviserResponse::Retry {
                wait: self.wait_for_attempt(&params.wait_interval_secs, attempt),
                retry_parameters: params.retry_parameters,
            });
        }

        let next_node_id = params.next_node_id;
        Ok(match params.repair_action_after_retries {
            RetryExhaustedAction::Fail => AdviserResponse::Fail,
            RetryExhaustedAction::Ignore => AdviserResponse::IgnoreFailure { next_node_id },
            RetryExhaustedAction::MarkSuccess => AdviserResponse::MarkSuccess { next_node_id },
            RetryExhaustedAction::EndPlan => AdviserResponse::EndPlan,
            RetryExhaustedAction::ManualIntervention => AdviserResponse::InterventionWait {
                timeout: self.intervention_timeout,
                repair_action: RepairAction::MarkAsFailure,
                next_node_id,
            },
        })
    }

    fn validate_parameters(&self, parameters: &Value) -> OrchestrationResult<()> {
        parse_parameters::<RetryParameters>(parameters).map(|_| ())
    }

    fn referenced_nodes(&self, parameters: &Value) -> OrchestrationResult<Vec<PlanNodeId>> {
        super::next_node_of(parameters)
    }
}
