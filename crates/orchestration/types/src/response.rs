//! Responses flowing through the engine: step results, facilitation and
//! advising decisions, callback payloads, and recorded executable responses

use crate::{
    aggregate_status, CorrelationId, ExecutionMode, NodeExecutionId, PlanNodeId, Status, TaskId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ── Failure Info ─────────────────────────────────────────────────────

/// Classification of a failure, used by advisers to filter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Application,
    Timeout,
    Connectivity,
    Authentication,
    Authorization,
    Verification,
    /// Raised by the engine itself (unregistered step, bad facilitation)
    Engine,
    Unknown,
}

/// Why a node failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    #[serde(default)]
    pub failure_types: Vec<FailureType>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>, failure_type: FailureType) -> Self {
        Self {
            message: message.into(),
            failure_types: vec![failure_type],
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(message, FailureType::Application)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message, FailureType::Timeout)
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(message, FailureType::Engine)
    }

    pub fn has_type(&self, failure_type: FailureType) -> bool {
        self.failure_types.contains(&failure_type)
    }

    /// True when `filter` is empty or shares a type with this failure
    pub fn matches_any(&self, filter: &[FailureType]) -> bool {
        filter.is_empty() || filter.iter().any(|t| self.has_type(*t))
    }
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ── Step Response ────────────────────────────────────────────────────

/// An outcome a step declares on completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub outcome: Value,
    /// Publish into the nearest level tagged with this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Final result of a step invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub outcomes: Vec<StepOutcome>,
}

impl StepResponse {
    pub fn success() -> Self {
        Self {
            status: Status::Succeeded,
            failure_info: None,
            outcomes: Vec::new(),
        }
    }

    pub fn failed(failure_info: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            failure_info: Some(failure_info),
            outcomes: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, name: impl Into<String>, outcome: Value) -> Self {
        self.outcomes.push(StepOutcome {
            name: name.into(),
            outcome,
            group: None,
        });
        self
    }

    pub fn with_group_outcome(
        mut self,
        name: impl Into<String>,
        outcome: Value,
        group: impl Into<String>,
    ) -> Self {
        self.outcomes.push(StepOutcome {
            name: name.into(),
            outcome,
            group: Some(group.into()),
        });
        self
    }

    /// Aggregate child notifications into a parent response
    pub fn from_child_responses(responses: &ResponseDataMap) -> Self {
        let notifications: Vec<&StepResponseNotifyData> = responses
            .values()
            .filter_map(ResponseData::as_step_notify)
            .collect();
        let status = aggregate_status(notifications.iter().map(|n| n.status));
        if status.is_positive() {
            return Self::success();
        }
        let failure_info = notifications
            .iter()
            .find_map(|n| n.failure_info.clone())
            .unwrap_or_else(|| FailureInfo::application(format!("child finished {}", status)));
        Self {
            status,
            failure_info: Some(failure_info),
            outcomes: Vec::new(),
        }
    }
}

// ── Facilitation ─────────────────────────────────────────────────────

/// A facilitator's decision for one node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorResponse {
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub initial_wait: Duration,
}

impl FacilitatorResponse {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            initial_wait: Duration::ZERO,
        }
    }

    pub fn with_initial_wait(mut self, wait: Duration) -> Self {
        self.initial_wait = wait;
        self
    }
}

// ── Advising ─────────────────────────────────────────────────────────

/// What happens to a failed node when nobody intervenes in time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairAction {
    Ignore,
    MarkAsSuccess,
    MarkAsFailure,
    EndExecution,
}

/// The action an adviser chose after a node finished
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    /// Continue with `next_node_id`, or end this chain when absent
    NextStep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<PlanNodeId>,
    },
    /// Finish the whole plan with this node's status
    EndPlan,
    /// Run the node again after `wait`, optionally with new parameters
    Retry {
        #[serde(default)]
        wait: Duration,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_parameters: Option<Value>,
    },
    /// Mark the node `IGNORE_FAILED` and continue
    IgnoreFailure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<PlanNodeId>,
    },
    /// Mark the node `SUCCEEDED` and continue
    MarkSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<PlanNodeId>,
    },
    /// Run the rollback node next; the branch stays failed
    RollbackStart { rollback_node_id: PlanNodeId },
    /// Wait for an operator, applying `repair_action` after `timeout`
    InterventionWait {
        timeout: Duration,
        repair_action: RepairAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<PlanNodeId>,
    },
    /// End this chain with the node's failure
    Fail,
}

impl AdviserResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            AdviserResponse::NextStep { .. } => "NEXT_STEP",
            AdviserResponse::EndPlan => "END_PLAN",
            AdviserResponse::Retry { .. } => "RETRY",
            AdviserResponse::IgnoreFailure { .. } => "IGNORE_FAILURE",
            AdviserResponse::MarkSuccess { .. } => "MARK_SUCCESS",
            AdviserResponse::RollbackStart { .. } => "ROLLBACK_START",
            AdviserResponse::InterventionWait { .. } => "INTERVENTION_WAIT",
            AdviserResponse::Fail => "FAIL",
        }
    }
}

// ── Callback Payloads ────────────────────────────────────────────────

/// Notification a finished child chain sends to its waiting parent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResponseNotifyData {
    /// Absent when the child was never started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<NodeExecutionId>,
    pub plan_node_id: PlanNodeId,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
}

/// Payload delivered against a correlation id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseData {
    /// Result of a delegated task or an async callback
    Payload { data: Value },
    /// The delegate or callback source reported an error
    Error { failure_info: FailureInfo },
    /// A child chain finished
    StepNotify(StepResponseNotifyData),
}

impl ResponseData {
    pub fn payload(data: Value) -> Self {
        ResponseData::Payload { data }
    }

    pub fn error(failure_info: FailureInfo) -> Self {
        ResponseData::Error { failure_info }
    }

    pub fn as_step_notify(&self) -> Option<&StepResponseNotifyData> {
        match self {
            ResponseData::StepNotify(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_payload(&self) -> Option<&Value> {
        match self {
            ResponseData::Payload { data } => Some(data),
            _ => None,
        }
    }

    pub fn failure_info(&self) -> Option<&FailureInfo> {
        match self {
            ResponseData::Error { failure_info } => Some(failure_info),
            _ => None,
        }
    }
}

/// Responses collected for one wait, keyed by correlation id
pub type ResponseDataMap = BTreeMap<CorrelationId, ResponseData>;

// ── Executable Responses ─────────────────────────────────────────────

/// One child of a `CHILDREN` node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSlot {
    pub plan_node_id: PlanNodeId,
    pub notify_id: CorrelationId,
    /// Set once the child has been started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<NodeExecutionId>,
    /// Never started because a sibling failed fast
    #[serde(default)]
    pub cancelled: bool,
}

impl ChildSlot {
    pub fn new(plan_node_id: PlanNodeId) -> Self {
        Self {
            plan_node_id,
            notify_id: CorrelationId::generate(),
            node_execution_id: None,
            cancelled: false,
        }
    }

    /// Neither started nor cancelled
    pub fn is_pending(&self) -> bool {
        self.node_execution_id.is_none() && !self.cancelled
    }
}

/// What the engine recorded about an invocation, per execution mode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableResponse {
    Sync,
    Async {
        callback_ids: Vec<CorrelationId>,
    },
    Task {
        task_id: TaskId,
        task_type: String,
    },
    TaskChain {
        task_id: TaskId,
        task_type: String,
        chain_end: bool,
        #[serde(default)]
        pass_through: Value,
    },
    Child {
        child_node_id: PlanNodeId,
        child_execution_id: NodeExecutionId,
        notify_id: CorrelationId,
    },
    Children {
        children: Vec<ChildSlot>,
        fail_fast: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrency: Option<usize>,
    },
    ChildChain {
        child_node_id: PlanNodeId,
        child_execution_id: NodeExecutionId,
        notify_id: CorrelationId,
        last_link: bool,
        #[serde(default)]
        pass_through: Value,
    },
}

impl ExecutableResponse {
    /// Task dispatched by this invocation, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            ExecutableResponse::Task { task_id, .. }
            | ExecutableResponse::TaskChain { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
