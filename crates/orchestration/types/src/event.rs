//! Engine events and status updates
//!
//! Every suspension in the engine is a handoff through an [`EngineEvent`];
//! resumption always re-enters through a queued event.

use crate::{
    CorrelationId, InterruptId, NodeExecutionId, PlanExecutionId, PlanNodeId, ResponseData,
    ResponseDataMap, Status, TimeoutInstanceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work for an engine worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// Run skip check and facilitation for a queued node
    Facilitate { node_execution_id: NodeExecutionId },
    /// Invoke the step in its facilitated mode
    Start { node_execution_id: NodeExecutionId },
    /// A response arrived for a correlation id
    Response {
        correlation_id: CorrelationId,
        payload: ResponseData,
    },
    /// Every correlation id of a wait has been answered
    Resume {
        node_execution_id: NodeExecutionId,
        responses: ResponseDataMap,
    },
    /// Ask the advisers what to do with a finished node
    Advise {
        node_execution_id: NodeExecutionId,
        status: Status,
    },
    /// Process a registered interrupt
    Interrupt { interrupt_id: InterruptId },
    /// A timeout tracker fired
    TimeoutExpired {
        node_execution_id: NodeExecutionId,
        timeout_instance_id: TimeoutInstanceId,
    },
    /// An intervention wait elapsed without an operator decision
    InterventionTimeout { node_execution_id: NodeExecutionId },
    /// Forget the correlation records of a finished plan execution
    PruneCorrelations { plan_execution_id: PlanExecutionId },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Facilitate { .. } => "FACILITATE",
            EngineEvent::Start { .. } => "START",
            EngineEvent::Response { .. } => "RESPONSE",
            EngineEvent::Resume { .. } => "RESUME",
            EngineEvent::Advise { .. } => "ADVISE",
            EngineEvent::Interrupt { .. } => "INTERRUPT",
            EngineEvent::TimeoutExpired { .. } => "TIMEOUT_EXPIRED",
            EngineEvent::InterventionTimeout { .. } => "INTERVENTION_TIMEOUT",
            EngineEvent::PruneCorrelations { .. } => "PRUNE_CORRELATIONS",
        }
    }

    /// The node execution this event acts on, if it names one
    pub fn node_execution_id(&self) -> Option<&NodeExecutionId> {
        match self {
            EngineEvent::Facilitate { node_execution_id }
            | EngineEvent::Start { node_execution_id }
            | EngineEvent::Resume {
                node_execution_id, ..
            }
            | EngineEvent::Advise {
                node_execution_id, ..
            }
            | EngineEvent::TimeoutExpired {
                node_execution_id, ..
            }
            | EngineEvent::InterventionTimeout { node_execution_id } => Some(node_execution_id),
            EngineEvent::Response { .. }
            | EngineEvent::Interrupt { .. }
            | EngineEvent::PruneCorrelations { .. } => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A status change observed by the engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusUpdate {
    Node {
        plan_execution_id: PlanExecutionId,
        node_execution_id: NodeExecutionId,
        plan_node_id: PlanNodeId,
        from: Status,
        to: Status,
        /// Record version after the change; orders updates of one node
        version: u64,
        at: DateTime<Utc>,
    },
    Plan {
        plan_execution_id: PlanExecutionId,
        from: Status,
        to: Status,
        at: DateTime<Utc>,
    },
}

impl StatusUpdate {
    pub fn plan_execution_id(&self) -> &PlanExecutionId {
        match self {
            StatusUpdate::Node {
                plan_execution_id, ..
            }
            | StatusUpdate::Plan {
                plan_execution_id, ..
            } => plan_execution_id,
        }
    }

    pub fn to_status(&self) -> Status {
        match self {
            StatusUpdate::Node { to, .. } | StatusUpdate::Plan { to, .. } => *to,
        }
    }
}
