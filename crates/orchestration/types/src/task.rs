//! Delegated task payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A unit of work a step hands to the task executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Selects the handler on the executing side
    pub task_type: String,
    #[serde(default)]
    pub parameters: Value,
    /// Hint for the executor; engine-side timeouts are separate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One round of a task chain: the task to dispatch and the data carried
/// into the next round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskChainLink {
    pub task: TaskRequest,
    /// Last round; the next result concludes the node
    #[serde(default)]
    pub chain_end: bool,
    #[serde(default)]
    pub pass_through: Value,
}
