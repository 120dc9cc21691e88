//! Error types for the orchestration layer

use crate::{
    ExecutionMode, FailureInfo, FailureType, InterruptId, NodeExecutionId, PlanExecutionId,
    PlanNodeId, Status, StepType,
};

/// Errors that can occur in orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Duplicate registration in {registry} registry: {key}")]
    DuplicateRegistration { registry: &'static str, key: String },

    #[error("Unregistered key in {registry} registry: {key}")]
    UnregisteredKey { registry: &'static str, key: String },

    #[error("Could not resolve {name}: {reason}")]
    Resolution { name: String, reason: String },

    #[error("Plan node not found: {0}")]
    PlanNodeNotFound(PlanNodeId),

    #[error("Duplicate plan node: {0}")]
    DuplicatePlanNode(PlanNodeId),

    #[error("Node execution not found: {0}")]
    NodeExecutionNotFound(NodeExecutionId),

    #[error("Plan execution not found: {0}")]
    PlanExecutionNotFound(PlanExecutionId),

    #[error("Interrupt not found: {0}")]
    InterruptNotFound(InterruptId),

    #[error("Invalid transition for {node_execution_id}: {from} -> {to}")]
    InvalidTransition {
        node_execution_id: NodeExecutionId,
        from: Status,
        to: Status,
    },

    #[error("Concurrent modification of {0}: update attempts exhausted")]
    ConcurrentModification(String),

    #[error("Interrupt rejected: {0}")]
    InterruptRejected(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Step {step_type} does not support {mode} execution")]
    UnsupportedMode {
        step_type: StepType,
        mode: ExecutionMode,
    },

    #[error("No facilitator produced an execution mode for {0}")]
    NoFacilitation(PlanNodeId),

    #[error("Output {name} already published in this scope")]
    DuplicateOutput { name: String },

    #[error("Task dispatch failed: {0}")]
    TaskDispatch(String),

    #[error("Event queue closed")]
    QueueClosed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestrationError {
    /// Errors that indicate a build or configuration problem rather than a
    /// runtime condition
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OrchestrationError::DuplicateRegistration { .. }
                | OrchestrationError::UnregisteredKey { .. }
                | OrchestrationError::UnsupportedMode { .. }
                | OrchestrationError::InvalidPlan(_)
        )
    }
}

/// Result type alias for orchestration operations
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Errors raised by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors a step implementation may return
///
/// The engine never decides policy on a step error. Every variant becomes
/// a [`FailureInfo`] on the node execution and goes to the advisers.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{message}")]
    Failed {
        message: String,
        failure_types: Vec<FailureType>,
    },

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl StepError {
    pub fn failed(message: impl Into<String>, failure_type: FailureType) -> Self {
        StepError::Failed {
            message: message.into(),
            failure_types: vec![failure_type],
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::failed(message, FailureType::Application)
    }

    pub fn into_failure_info(self) -> FailureInfo {
        match self {
            StepError::Failed {
                message,
                failure_types,
            } => FailureInfo {
                message,
                failure_types,
            },
            StepError::Orchestration(err) => {
                let failure_type = if err.is_configuration() {
                    FailureType::Engine
                } else {
                    FailureType::Application
                };
                FailureInfo::new(err.to_string(), failure_type)
            }
            StepError::Serialization(err) => FailureInfo::application(err.to_string()),
        }
    }
}

impl From<StepError> for FailureInfo {
    fn from(err: StepError) -> Self {
        err.into_failure_info()
    }
}

/// Result type alias for step implementations
pub type StepResult<T> = Result<T, StepError>;
