//! Storage trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestration_types::{
    CorrelationId, CorrelationWait, EarlyResponse, Interrupt, InterruptId, NodeExecution,
    NodeExecutionId, OutputInstance, PlanExecution, PlanExecutionId, RefType, StorageResult,
};

/// Combined storage trait
#[async_trait]
pub trait Storage:
    PlanExecutionStorage
    + NodeExecutionStorage
    + InterruptStorage
    + OutputStorage
    + CorrelationStorage
    + Send
    + Sync
{
}

/// Storage for plan executions
#[async_trait]
pub trait PlanExecutionStorage: Send + Sync {
    /// Store a new plan execution
    async fn create_plan_execution(&self, execution: PlanExecution) -> StorageResult<()>;

    /// Get a plan execution by ID
    async fn get_plan_execution(&self, id: &PlanExecutionId) -> StorageResult<Option<PlanExecution>>;

    /// Replace a plan execution if its version still matches; returns the
    /// stored record with the bumped version
    async fn replace_plan_execution(&self, execution: PlanExecution) -> StorageResult<PlanExecution>;

    /// List all plan executions
    async fn list_plan_executions(&self) -> StorageResult<Vec<PlanExecution>>;
}

/// Storage for node executions
#[async_trait]
pub trait NodeExecutionStorage: Send + Sync {
    /// Store a new node execution
    async fn create_node_execution(&self, execution: NodeExecution) -> StorageResult<()>;

    /// Get a node execution by ID
    async fn get_node_execution(&self, id: &NodeExecutionId) -> StorageResult<Option<NodeExecution>>;

    /// Replace a node execution if its version still matches; returns the
    /// stored record with the bumped version
    async fn replace_node_execution(&self, execution: NodeExecution) -> StorageResult<NodeExecution>;

    /// Node executions of a plan execution, in creation order
    async fn list_node_executions(
        &self,
        plan_execution_id: &PlanExecutionId,
    ) -> StorageResult<Vec<NodeExecution>>;

    /// Node executions spawned as children of `parent_id`, in creation order
    async fn list_children(&self, parent_id: &NodeExecutionId) -> StorageResult<Vec<NodeExecution>>;
}

/// Storage for interrupts
#[async_trait]
pub trait InterruptStorage: Send + Sync {
    /// Store a new interrupt
    async fn create_interrupt(&self, interrupt: Interrupt) -> StorageResult<()>;

    /// Get an interrupt by ID
    async fn get_interrupt(&self, id: &InterruptId) -> StorageResult<Option<Interrupt>>;

    /// Replace an interrupt if its version still matches
    async fn replace_interrupt(&self, interrupt: Interrupt) -> StorageResult<Interrupt>;

    /// Interrupts of a plan execution, in registration order
    async fn list_interrupts(&self, plan_execution_id: &PlanExecutionId) -> StorageResult<Vec<Interrupt>>;
}

/// Storage for outcomes and sweeping outputs
#[async_trait]
pub trait OutputStorage: Send + Sync {
    /// Store an output instance.
    ///
    /// Instances are never overwritten. A retry of the same plan node adds
    /// a newer instance, and outcomes of different producers in one scope
    /// are kept side by side. A sweeping output colliding with another
    /// producer's fails with `AlreadyExists`.
    async fn save_output(&self, output: OutputInstance) -> StorageResult<()>;

    /// Outputs of one kind and name within a plan execution
    async fn list_outputs(
        &self,
        plan_execution_id: &PlanExecutionId,
        ref_type: &RefType,
        name: &str,
    ) -> StorageResult<Vec<OutputInstance>>;
}

/// Storage for the correlation table: waits, early responses and ids that
/// were already delivered
#[async_trait]
pub trait CorrelationStorage: Send + Sync {
    /// Store a wait, replacing any earlier wait of the same node execution
    async fn save_wait(&self, wait: CorrelationWait) -> StorageResult<()>;

    /// Get the wait of a node execution
    async fn get_wait(&self, node_execution_id: &NodeExecutionId) -> StorageResult<Option<CorrelationWait>>;

    /// Remove and return the wait of a node execution
    async fn remove_wait(&self, node_execution_id: &NodeExecutionId) -> StorageResult<Option<CorrelationWait>>;

    /// The wait expecting `correlation_id`
    async fn find_wait(&self, correlation_id: &CorrelationId) -> StorageResult<Option<CorrelationWait>>;

    /// Hold a response whose wait has not been registered yet
    async fn save_early_response(&self, response: EarlyResponse) -> StorageResult<()>;

    async fn get_early_response(&self, correlation_id: &CorrelationId) -> StorageResult<Option<EarlyResponse>>;

    /// Remove and return a held response
    async fn take_early_response(&self, correlation_id: &CorrelationId) -> StorageResult<Option<EarlyResponse>>;

    /// Record ids no further response will be accepted for
    async fn mark_consumed(
        &self,
        plan_execution_id: &PlanExecutionId,
        correlation_ids: Vec<CorrelationId>,
    ) -> StorageResult<()>;

    async fn is_consumed(&self, correlation_id: &CorrelationId) -> StorageResult<bool>;

    /// Forget every wait and consumed id of a plan execution; returns the
    /// number of records removed
    async fn prune_correlations(&self, plan_execution_id: &PlanExecutionId) -> StorageResult<usize>;

    /// Forget held responses received before `before`
    async fn prune_early_responses(&self, before: DateTime<Utc>) -> StorageResult<usize>;
}
