//! A step that runs its children in parallel

use crate::step::{ChildrenExecutable, ChildrenRequest, Step, StepContext};
use async_trait::async_trait;
use orchestration_types::{PlanNodeId, StepResult, StepType};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkParameters {
    child_node_ids: Vec<PlanNodeId>,
    #[serde(default)]
    fail_fast: bool,
    #[serde(default)]
    max_concurrency: Option<usize>,
}

pub struct ForkStep;

impl ForkStep {
    pub fn step_type() -> StepType {
        StepType::from_static("FORK")
    }
}

impl Step for ForkStep {
    fn as_children(&self) -> Option<&dyn ChildrenExecutable> {
        Some(self)
    }

    fn referenced_nodes(&self, parameters: &Value) -> Vec<PlanNodeId> {
        serde_json::from_value::<ForkParameters>(parameters.clone())
            .map(|p| p.child_node_ids)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChildrenExecutable for ForkStep {
    async fn obtain_children(&self, ctx: &StepContext) -> StepResult<ChildrenRequest> {
        let params: ForkParameters = ctx.parameters_as()?;
        let mut request = ChildrenRequest::new(params.child_node_ids).with_fail_fast(params.fail_fast);
        if let Some(limit) = params.max_concurrency {
            request = request.with_max_concurrency(limit);
        }
        Ok(request)
    }
}
