//! A step that runs its children one after another

use crate::step::{ChildChainExecutable, ChildChainLink, Step, StepContext};
use async_trait::async_trait;
use orchestration_types::{FailureType, PlanNodeId, ResponseDataMap, StepError, StepResult, StepType};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionChainParameters {
    child_node_ids: Vec<PlanNodeId>,
}

pub struct SectionChainStep;

impl SectionChainStep {
    pub fn step_type() -> StepType {
        StepType::from_static("SECTION_CHAIN")
    }

    fn link(children: &[PlanNodeId], index: usize) -> StepResult<ChildChainLink> {
        let child_node_id = children.get(index).cloned().ok_or_else(|| {
            StepError::failed(
                format!("section chain has no child at position {}", index),
                FailureType::Engine,
            )
        })?;
        Ok(ChildChainLink {
            child_node_id,
            pass_through: json!({ "index": index }),
            last_link: index + 1 >= children.len(),
        })
    }
}

impl Step for SectionChainStep {
    fn as_child_chain(&self) -> Option<&dyn ChildChainExecutable> {
        Some(self)
    }

    fn referenced_nodes(&self, parameters: &Value) -> Vec<PlanNodeId> {
        serde_json::from_value::<SectionChainParameters>(parameters.clone())
            .map(|p| p.child_node_ids)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChildChainExecutable for SectionChainStep {
    async fn start_child_chain(&self, ctx: &StepContext) -> StepResult<ChildChainLink> {
        let params: SectionChainParameters = ctx.parameters_as()?;
        Self::link(&params.child_node_ids, 0)
    }

    async fn next_child_link(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        _responses: &ResponseDataMap,
    ) -> StepResult<ChildChainLink> {
        let params: SectionChainParameters = ctx.parameters_as()?;
        let index = pass_through
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        Self::link(&params.child_node_ids, index + 1)
    }
}
