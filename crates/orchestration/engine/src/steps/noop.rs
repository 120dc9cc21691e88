//! A step that succeeds immediately

use crate::step::{Step, StepContext, SyncExecutable};
use async_trait::async_trait;
use orchestration_types::{StepResponse, StepResult, StepType};

pub struct NoopStep;

impl NoopStep {
    pub fn step_type() -> StepType {
        StepType::from_static("NOOP")
    }
}

impl Step for NoopStep {
    fn as_sync(&self) -> Option<&dyn SyncExecutable> {
        Some(self)
    }
}

#[async_trait]
impl SyncExecutable for NoopStep {
    async fn execute_sync(&self, _ctx: &StepContext) -> StepResult<StepResponse> {
        Ok(StepResponse::success())
    }
}
