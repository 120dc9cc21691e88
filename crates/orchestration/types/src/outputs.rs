//! Outcomes, sweeping outputs and references to them

use crate::{NodeExecutionId, OutputInstanceId, PlanExecutionId, PlanNodeId, RefType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named reference to an output published by an earlier node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefObject {
    pub name: String,
    /// Explicit producing plan node; nearest scope when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<PlanNodeId>,
    /// Top-level field to extract from the output value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub ref_type: RefType,
}

impl RefObject {
    pub fn outcome(name: impl Into<String>) -> Self {
        Self::new(name, RefType::OUTCOME)
    }

    pub fn sweeping_output(name: impl Into<String>) -> Self {
        Self::new(name, RefType::SWEEPING_OUTPUT)
    }

    pub fn new(name: impl Into<String>, ref_type: RefType) -> Self {
        Self {
            name: name.into(),
            producer_id: None,
            key: None,
            ref_type,
        }
    }

    pub fn from_producer(mut self, producer_id: impl Into<PlanNodeId>) -> Self {
        self.producer_id = Some(producer_id.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A persisted output value, visible within its scope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputInstance {
    pub uuid: OutputInstanceId,
    pub plan_execution_id: PlanExecutionId,
    pub ref_type: RefType,
    pub name: String,
    /// Node execution that published the value
    pub producer_id: NodeExecutionId,
    /// Plan node of the producer
    pub producer_setup_id: PlanNodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Runtime ids of the enclosing levels; the value is visible to every
    /// node whose level stack starts with this prefix
    pub scope: Vec<NodeExecutionId>,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

impl OutputInstance {
    /// Whether this instance would conflict with `other` (same kind, name,
    /// and scope)
    pub fn collides_with(&self, other: &OutputInstance) -> bool {
        self.plan_execution_id == other.plan_execution_id
            && self.ref_type == other.ref_type
            && self.name == other.name
            && self.scope == other.scope
    }
}
