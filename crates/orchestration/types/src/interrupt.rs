//! Interrupts: externally-triggered control actions on a running plan

use crate::{InterruptId, NodeExecutionId, PlanExecutionId, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of control action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    /// Abort one node and its live descendants
    Abort,
    /// Abort every live node of the plan
    AbortAll,
    Pause,
    PauseAll,
    Resume,
    ResumeAll,
    /// Re-run a failed or expired node as a new attempt
    Retry,
    /// Resolve an intervention wait as failed
    MarkFailed,
    /// Resolve an intervention wait as succeeded
    MarkSuccess,
    /// Resolve an intervention wait as ignored
    Ignore,
    /// Raised by the timeout engine
    Expire,
}

impl InterruptType {
    /// Targets every node of the plan rather than one node
    pub fn is_plan_wide(self) -> bool {
        matches!(
            self,
            InterruptType::AbortAll | InterruptType::PauseAll | InterruptType::ResumeAll
        )
    }

    /// Needs a node execution id
    pub fn requires_node(self) -> bool {
        !self.is_plan_wide() && self != InterruptType::Abort
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterruptType::Abort => "ABORT",
            InterruptType::AbortAll => "ABORT_ALL",
            InterruptType::Pause => "PAUSE",
            InterruptType::PauseAll => "PAUSE_ALL",
            InterruptType::Resume => "RESUME",
            InterruptType::ResumeAll => "RESUME_ALL",
            InterruptType::Retry => "RETRY",
            InterruptType::MarkFailed => "MARK_FAILED",
            InterruptType::MarkSuccess => "MARK_SUCCESS",
            InterruptType::Ignore => "IGNORE",
            InterruptType::Expire => "EXPIRE",
        };
        f.write_str(name)
    }
}

/// Processing state; moves forward only
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    ProcessedSuccessfully,
    ProcessedUnsuccessfully,
}

impl InterruptState {
    pub fn is_processed(self) -> bool {
        matches!(
            self,
            InterruptState::ProcessedSuccessfully | InterruptState::ProcessedUnsuccessfully
        )
    }
}

/// A status change an interrupt caused
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub node_execution_id: NodeExecutionId,
    pub from_status: Status,
    pub to_status: Status,
    pub took_effect_at: DateTime<Utc>,
}

/// Entry in a node execution's interrupt history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub interrupt_id: InterruptId,
    pub interrupt_type: InterruptType,
    pub from_status: Status,
    pub to_status: Status,
    pub at: DateTime<Utc>,
}

/// A registered interrupt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Interrupt {
    pub uuid: InterruptId,
    pub plan_execution_id: PlanExecutionId,
    /// Plan-wide when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<NodeExecutionId>,
    pub interrupt_type: InterruptType,
    pub state: InterruptState,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,
    #[serde(default)]
    pub effects: Vec<InterruptEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Interrupt {
    pub fn from_request(request: InterruptRequest, now: DateTime<Utc>) -> Self {
        Self {
            uuid: InterruptId::generate(),
            plan_execution_id: request.plan_execution_id,
            node_execution_id: request.node_execution_id,
            interrupt_type: request.interrupt_type,
            state: InterruptState::Registered,
            parameters: request.parameters,
            issued_by: request.issued_by,
            effects: Vec::new(),
            failure_reason: None,
            created_at: now,
            processed_at: None,
            version: 0,
        }
    }

    /// Whether the interrupt touches every node rather than one
    pub fn is_plan_wide(&self) -> bool {
        self.interrupt_type.is_plan_wide() || self.node_execution_id.is_none()
    }

    pub fn record_for(&self, effect: &InterruptEffect) -> InterruptRecord {
        InterruptRecord {
            interrupt_id: self.uuid.clone(),
            interrupt_type: self.interrupt_type,
            from_status: effect.from_status,
            to_status: effect.to_status,
            at: effect.took_effect_at,
        }
    }
}

/// Inbound request to register an interrupt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub interrupt_type: InterruptType,
    pub plan_execution_id: PlanExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<NodeExecutionId>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,
}

impl InterruptRequest {
    pub fn new(interrupt_type: InterruptType, plan_execution_id: PlanExecutionId) -> Self {
        Self {
            interrupt_type,
            plan_execution_id,
            node_execution_id: None,
            parameters: Value::Null,
            issued_by: None,
        }
    }

    pub fn for_node(mut self, node_execution_id: NodeExecutionId) -> Self {
        self.node_execution_id = Some(node_execution_id);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn issued_by(mut self, who: impl Into<String>) -> Self {
        self.issued_by = Some(who.into());
        self
    }
}
