//! Runtime records: plan executions and node executions

use crate::{
    AdviserResponse, Ambiance, CorrelationId, ExecutableResponse, ExecutionMode, FailureInfo,
    InterruptRecord, NodeExecutionId, Plan, PlanExecutionId, PlanNode, PlanNodeId,
    ResponseDataMap, SetupAbstractions, Status, StepResponse, StepType, TaskId,
    TimeoutInstanceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ── Plan Execution ───────────────────────────────────────────────────

/// One run of a plan
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanExecution {
    pub uuid: PlanExecutionId,
    pub plan: Arc<Plan>,
    pub status: Status,
    #[serde(default)]
    pub setup_abstractions: SetupAbstractions,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub start_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
    /// First failure that made the plan unsuccessful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    pub version: u64,
}

impl PlanExecution {
    pub fn new(
        uuid: PlanExecutionId,
        plan: Arc<Plan>,
        setup_abstractions: SetupAbstractions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            plan,
            status: Status::Running,
            setup_abstractions,
            metadata: BTreeMap::new(),
            start_ts: now,
            end_ts: None,
            failure_info: None,
            version: 0,
        }
    }

    pub fn root_ambiance(&self) -> Ambiance {
        let mut ambiance = Ambiance::new(self.uuid.clone(), self.setup_abstractions.clone());
        ambiance.metadata = self.metadata.clone();
        ambiance
    }
}

// ── Node Execution ───────────────────────────────────────────────────

/// What a paused node does when it is resumed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingResumption {
    /// Paused before invocation; facilitate again
    Facilitate,
    /// Responses arrived while pausing; replay them
    Resume { responses: ResponseDataMap },
    /// A sync invocation finished while pausing; conclude with its result
    Conclude { response: StepResponse },
}

/// The mutable record of one attempt at one plan node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: NodeExecutionId,
    pub ambiance: Ambiance,
    pub plan_node: Arc<PlanNode>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,

    /// Node execution waiting on this one, when spawned as a child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeExecutionId>,
    /// Previous node in the same sibling chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<NodeExecutionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<NodeExecutionId>,
    /// Correlation id the parent waits on; shared by every node of one chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_id: Option<CorrelationId>,

    /// The attempt this one replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_retry_id: Option<NodeExecutionId>,
    /// The attempt that replaced this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_retry_id: Option<NodeExecutionId>,
    /// Every earlier attempt, oldest first
    #[serde(default)]
    pub retry_ids: Vec<NodeExecutionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    #[serde(default)]
    pub executable_responses: Vec<ExecutableResponse>,
    #[serde(default)]
    pub timeout_instance_ids: Vec<TimeoutInstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingResumption>,
    #[serde(default)]
    pub interrupt_history: Vec<InterruptRecord>,

    /// Optimistic concurrency version; bumped on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeExecution {
    /// A fresh `QUEUED` execution of `plan_node` within `ambiance`
    ///
    /// `ambiance` must already carry the level for this execution.
    pub fn new(
        uuid: NodeExecutionId,
        ambiance: Ambiance,
        plan_node: Arc<PlanNode>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            ambiance,
            plan_node,
            status: Status::Queued,
            mode: None,
            parent_id: None,
            previous_id: None,
            next_id: None,
            notify_id: None,
            old_retry_id: None,
            new_retry_id: None,
            retry_ids: Vec::new(),
            start_ts: None,
            end_ts: None,
            failure_info: None,
            adviser_response: None,
            executable_responses: Vec::new(),
            timeout_instance_ids: Vec::new(),
            pending: None,
            interrupt_history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn plan_execution_id(&self) -> &PlanExecutionId {
        &self.ambiance.plan_execution_id
    }

    pub fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node.uuid
    }

    pub fn step_type(&self) -> &StepType {
        &self.plan_node.step_type
    }

    /// Replaced by a newer attempt
    pub fn is_retried(&self) -> bool {
        self.new_retry_id.is_some()
    }

    /// Whether an adviser has already acted on this execution
    pub fn is_advised(&self) -> bool {
        self.adviser_response.is_some()
    }

    pub fn last_executable_response(&self) -> Option<&ExecutableResponse> {
        self.executable_responses.last()
    }

    /// Tasks dispatched by this execution, in dispatch order
    pub fn task_ids(&self) -> Vec<&TaskId> {
        self.executable_responses
            .iter()
            .filter_map(ExecutableResponse::task_id)
            .collect()
    }

    /// Whether this node heads or continues a chain reporting to a parent
    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn record_interrupt(&mut self, record: InterruptRecord) {
        self.interrupt_history.push(record);
    }
}
