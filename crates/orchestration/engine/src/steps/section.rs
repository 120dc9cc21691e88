//! A step that runs one nested child

use crate::step::{ChildExecutable, ChildRequest, Step, StepContext};
use async_trait::async_trait;
use orchestration_types::{PlanNodeId, StepResult, StepType};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionParameters {
    child_node_id: PlanNodeId,
    /// Published as sweeping outputs visible to the child's subtree
    #[serde(default)]
    inputs: BTreeMap<String, Value>,
}

pub struct SectionStep;

impl SectionStep {
    pub fn step_type() -> StepType {
        StepType::from_static("SECTION")
    }
}

impl Step for SectionStep {
    fn as_child(&self) -> Option<&dyn ChildExecutable> {
        Some(self)
    }

    fn referenced_nodes(&self, parameters: &Value) -> Vec<PlanNodeId> {
        serde_json::from_value::<SectionParameters>(parameters.clone())
            .map(|p| vec![p.child_node_id])
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChildExecutable for SectionStep {
    async fn obtain_child(&self, ctx: &StepContext) -> StepResult<ChildRequest> {
        let params: SectionParameters = ctx.parameters_as()?;
        Ok(ChildRequest {
            child_node_id: params.child_node_id,
            additional_inputs: params.inputs,
        })
    }
}
