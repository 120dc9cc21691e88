//! A step that hands its work to the task executor

use crate::step::{Step, StepContext, TaskChainExecutable, TaskExecutable};
use async_trait::async_trait;
use orchestration_types::{
    FailureInfo, FailureType, ResponseDataMap, StepError, StepResponse, StepResult, StepType,
    TaskChainLink, TaskRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskSpec {
    task_type: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl TaskSpec {
    fn into_request(self) -> TaskRequest {
        let request = TaskRequest::new(self.task_type, self.parameters);
        match self.timeout_secs {
            Some(secs) => request.with_timeout(Duration::from_secs(secs)),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChainParameters {
    tasks: Vec<TaskSpec>,
}

/// The single result of one delegated round
fn round_result(responses: &ResponseDataMap) -> Result<Value, FailureInfo> {
    let Some(response) = responses.values().next() else {
        return Err(FailureInfo::engine("task finished without a result"));
    };
    if let Some(failure) = response.failure_info() {
        return Err(failure.clone());
    }
    Ok(response.as_payload().cloned().unwrap_or(Value::Null))
}

fn chain_index(pass_through: &Value) -> usize {
    pass_through
        .get("index")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize
}

fn chain_outputs(pass_through: &Value) -> Vec<Value> {
    pass_through
        .get("outputs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Delegates `taskType` (task mode) or a `tasks` list (task chain mode)
///
/// The task's payload becomes the `output` outcome; an error result fails
/// the node with the reported failure.
pub struct DelegateStep;

impl DelegateStep {
    pub fn step_type() -> StepType {
        StepType::from_static("DELEGATE")
    }

    fn chain_link(ctx: &StepContext, index: usize, outputs: Vec<Value>) -> StepResult<TaskChainLink> {
        let params: ChainParameters = ctx.parameters_as()?;
        let count = params.tasks.len();
        let spec = params.tasks.into_iter().nth(index).ok_or_else(|| {
            StepError::failed(
                format!("task chain has no task at position {}", index),
                FailureType::Engine,
            )
        })?;
        Ok(TaskChainLink {
            task: spec.into_request(),
            chain_end: index + 1 >= count,
            pass_through: json!({ "index": index, "outputs": outputs }),
        })
    }
}

impl Step for DelegateStep {
    fn as_task(&self) -> Option<&dyn TaskExecutable> {
        Some(self)
    }

    fn as_task_chain(&self) -> Option<&dyn TaskChainExecutable> {
        Some(self)
    }
}

#[async_trait]
impl TaskExecutable for DelegateStep {
    async fn obtain_task(&self, ctx: &StepContext) -> StepResult<TaskRequest> {
        let spec: TaskSpec = ctx.parameters_as()?;
        Ok(spec.into_request())
    }

    async fn handle_task_result(
        &self,
        _ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse> {
        Ok(match round_result(responses) {
            Ok(output) => StepResponse::success().with_outcome("output", output),
            Err(failure) => StepResponse::failed(failure),
        })
    }
}

#[async_trait]
impl TaskChainExecutable for DelegateStep {
    async fn start_chain_link(&self, ctx: &StepContext) -> StepResult<TaskChainLink> {
        Self::chain_link(ctx, 0, Vec::new())
    }

    async fn next_chain_link(
        &self,
        ctx: &StepContext,
        pass_through: &Value,
        responses: &ResponseDataMap,
    ) -> StepResult<TaskChainLink> {
        let output = round_result(responses).map_err(|failure| StepError::Failed {
            message: failure.message,
            failure_types: failure.failure_types,
        })?;
        let mut outputs = chain_outputs(pass_through);
        outputs.push(output);
        Self::chain_link(ctx, chain_index(pass_through) + 1, outputs)
    }

    async fn finalize_chain(
        &self,
        _ctx: &StepContext,
        pass_through: &Value,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse> {
        Ok(match round_result(responses) {
            Ok(output) => {
                let mut outputs = chain_outputs(pass_through);
                outputs.push(output);
                StepResponse::success().with_outcome("output", Value::Array(outputs))
            }
            Err(failure) => StepResponse::failed(failure),
        })
    }
}
