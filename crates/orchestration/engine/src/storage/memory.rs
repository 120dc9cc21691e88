//! In-memory storage implementation

use super::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestration_types::{
    CorrelationId, CorrelationWait, EarlyResponse, Interrupt, InterruptId, NodeExecution,
    NodeExecutionId, OutputInstance, PlanExecution, PlanExecutionId, RefType, StorageError,
    StorageResult,
};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::RwLock;

/// A stored record and the sequence number it was created with
type Sequenced<T> = (u64, T);

/// Waits indexed by the ids they expect
#[derive(Debug, Default)]
struct CorrelationTable {
    waits: HashMap<NodeExecutionId, CorrelationWait>,
    index: HashMap<CorrelationId, NodeExecutionId>,
    early: HashMap<CorrelationId, EarlyResponse>,
    consumed: HashMap<CorrelationId, PlanExecutionId>,
}

impl CorrelationTable {
    fn unindex(&mut self, wait: &CorrelationWait) {
        for id in &wait.expected {
            if self.index.get(id) == Some(&wait.node_execution_id) {
                self.index.remove(id);
            }
        }
    }
}

/// In-memory storage for development and testing
#[derive(Debug)]
pub struct InMemoryStorage {
    plan_executions: Arc<RwLock<HashMap<PlanExecutionId, Sequenced<PlanExecution>>>>,
    node_executions: Arc<RwLock<HashMap<NodeExecutionId, Sequenced<NodeExecution>>>>,
    interrupts: Arc<RwLock<HashMap<InterruptId, Sequenced<Interrupt>>>>,
    outputs: Arc<RwLock<Vec<OutputInstance>>>,
    correlations: Arc<RwLock<CorrelationTable>>,
    sequence: Arc<AtomicU64>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            plan_executions: Arc::new(RwLock::new(HashMap::new())),
            node_executions: Arc::new(RwLock::new(HashMap::new())),
            interrupts: Arc::new(RwLock::new(HashMap::new())),
            outputs: Arc::new(RwLock::new(Vec::new())),
            correlations: Arc::new(RwLock::new(CorrelationTable::default())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

fn in_order<T: Clone>(mut records: Vec<&Sequenced<T>>) -> Vec<T> {
    records.sort_by_key(|(seq, _)| *seq);
    records.into_iter().map(|(_, r)| r.clone()).collect()
}

fn check_version(id: &str, expected: u64, found: u64) -> StorageResult<()> {
    if expected != found {
        return Err(StorageError::Conflict {
            id: id.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

#[async_trait]
impl PlanExecutionStorage for InMemoryStorage {
    async fn create_plan_execution(&self, execution: PlanExecution) -> StorageResult<()> {
        let mut executions = self.plan_executions.write().await;
        if executions.contains_key(&execution.uuid) {
            return Err(StorageError::AlreadyExists(execution.uuid.to_string()));
        }
        let seq = self.next_sequence();
        executions.insert(execution.uuid.clone(), (seq, execution));
        Ok(())
    }

    async fn get_plan_execution(&self, id: &PlanExecutionId) -> StorageResult<Option<PlanExecution>> {
        let executions = self.plan_executions.read().await;
        Ok(executions.get(id).map(|(_, e)| e.clone()))
    }

    async fn replace_plan_execution(&self, mut execution: PlanExecution) -> StorageResult<PlanExecution> {
        let mut executions = self.plan_executions.write().await;
        let (_, stored) = executions
            .get_mut(&execution.uuid)
            .ok_or_else(|| StorageError::NotFound(execution.uuid.to_string()))?;
        check_version(execution.uuid.as_str(), execution.version, stored.version)?;
        execution.version += 1;
        *stored = execution.clone();
        Ok(execution)
    }

    async fn list_plan_executions(&self) -> StorageResult<Vec<PlanExecution>> {
        let executions = self.plan_executions.read().await;
        Ok(in_order(executions.values().collect()))
    }
}

#[async_trait]
impl NodeExecutionStorage for InMemoryStorage {
    async fn create_node_execution(&self, execution: NodeExecution) -> StorageResult<()> {
        let mut executions = self.node_executions.write().await;
        if executions.contains_key(&execution.uuid) {
            return Err(StorageError::AlreadyExists(execution.uuid.to_string()));
        }
        let seq = self.next_sequence();
        executions.insert(execution.uuid.clone(), (seq, execution));
        Ok(())
    }

    async fn get_node_execution(&self, id: &NodeExecutionId) -> StorageResult<Option<NodeExecution>> {
        let executions = self.node_executions.read().await;
        Ok(executions.get(id).map(|(_, e)| e.clone()))
    }

    async fn replace_node_execution(&self, mut execution: NodeExecution) -> StorageResult<NodeExecution> {
        let mut executions = self.node_executions.write().await;
        let (_, stored) = executions
            .get_mut(&execution.uuid)
            .ok_or_else(|| StorageError::NotFound(execution.uuid.to_string()))?;
        check_version(execution.uuid.as_str(), execution.version, stored.version)?;
        execution.version += 1;
        *stored = execution.clone();
        Ok(execution)
    }

    async fn list_node_executions(
        &self,
        plan_execution_id: &PlanExecutionId,
    ) -> StorageResult<Vec<NodeExecution>> {
        let executions = self.node_executions.read().await;
        Ok(in_order(
            executions
                .values()
                .filter(|(_, e)| e.plan_execution_id() == plan_execution_id)
                .collect(),
        ))
    }

    async fn list_children(&self, parent_id: &NodeExecutionId) -> StorageResult<Vec<NodeExecution>> {
        let executions = self.node_executions.read().await;
        Ok(in_order(
            executions
                .values()
                .filter(|(_, e)| e.parent_id.as_ref() == Some(parent_id))
                .collect(),
        ))
    }
}

#[async_trait]
impl InterruptStorage for InMemoryStorage {
    async fn create_interrupt(&self, interrupt: Interrupt) -> StorageResult<()> {
        let mut interrupts = self.interrupts.write().await;
        if interrupts.contains_key(&interrupt.uuid) {
            return Err(StorageError::AlreadyExists(interrupt.uuid.to_string()));
        }
        let seq = self.next_sequence();
        interrupts.insert(interrupt.uuid.clone(), (seq, interrupt));
        Ok(())
    }

    async fn get_interrupt(&self, id: &InterruptId) -> StorageResult<Option<Interrupt>> {
        let interrupts = self.interrupts.read().await;
        Ok(interrupts.get(id).map(|(_, i)| i.clone()))
    }

    async fn replace_interrupt(&self, mut interrupt: Interrupt) -> StorageResult<Interrupt> {
        let mut interrupts = self.interrupts.write().await;
        let (_, stored) = interrupts
            .get_mut(&interrupt.uuid)
            .ok_or_else(|| StorageError::NotFound(interrupt.uuid.to_string()))?;
        check_version(interrupt.uuid.as_str(), interrupt.version, stored.version)?;
        interrupt.version += 1;
        *stored = interrupt.clone();
        Ok(interrupt)
    }

    async fn list_interrupts(&self, plan_execution_id: &PlanExecutionId) -> StorageResult<Vec<Interrupt>> {
        let interrupts = self.interrupts.read().await;
        Ok(in_order(
            interrupts
                .values()
                .filter(|(_, i)| &i.plan_execution_id == plan_execution_id)
                .collect(),
        ))
    }
}

#[async_trait]
impl OutputStorage for InMemoryStorage {
    async fn save_output(&self, output: OutputInstance) -> StorageResult<()> {
        let mut outputs = self.outputs.write().await;
        let foreign_collision = outputs
            .iter()
            .any(|o| o.collides_with(&output) && o.producer_setup_id != output.producer_setup_id);
        if output.ref_type == RefType::SWEEPING_OUTPUT && foreign_collision {
            return Err(StorageError::AlreadyExists(output.name));
        }
        outputs.push(output);
        Ok(())
    }

    async fn list_outputs(
        &self,
        plan_execution_id: &PlanExecutionId,
        ref_type: &RefType,
        name: &str,
    ) -> StorageResult<Vec<OutputInstance>> {
        let outputs = self.outputs.read().await;
        Ok(outputs
            .iter()
            .filter(|o| &o.plan_execution_id == plan_execution_id && &o.ref_type == ref_type && o.name == name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CorrelationStorage for InMemoryStorage {
    async fn save_wait(&self, wait: CorrelationWait) -> StorageResult<()> {
        let mut table = self.correlations.write().await;
        if let Some(previous) = table.waits.remove(&wait.node_execution_id) {
            table.unindex(&previous);
        }
        for id in &wait.expected {
            table.index.insert(id.clone(), wait.node_execution_id.clone());
        }
        table.waits.insert(wait.node_execution_id.clone(), wait);
        Ok(())
    }

    async fn get_wait(&self, node_execution_id: &NodeExecutionId) -> StorageResult<Option<CorrelationWait>> {
        Ok(self.correlations.read().await.waits.get(node_execution_id).cloned())
    }

    async fn remove_wait(&self, node_execution_id: &NodeExecutionId) -> StorageResult<Option<CorrelationWait>> {
        let mut table = self.correlations.write().await;
        let removed = table.waits.remove(node_execution_id);
        if let Some(wait) = &removed {
            table.unindex(wait);
        }
        Ok(removed)
    }

    async fn find_wait(&self, correlation_id: &CorrelationId) -> StorageResult<Option<CorrelationWait>> {
        let table = self.correlations.read().await;
        Ok(table
            .index
            .get(correlation_id)
            .and_then(|node| table.waits.get(node))
            .cloned())
    }

    async fn save_early_response(&self, response: EarlyResponse) -> StorageResult<()> {
        let mut table = self.correlations.write().await;
        table.early.insert(response.correlation_id.clone(), response);
        Ok(())
    }

    async fn get_early_response(&self, correlation_id: &CorrelationId) -> StorageResult<Option<EarlyResponse>> {
        Ok(self.correlations.read().await.early.get(correlation_id).cloned())
    }

    async fn take_early_response(&self, correlation_id: &CorrelationId) -> StorageResult<Option<EarlyResponse>> {
        Ok(self.correlations.write().await.early.remove(correlation_id))
    }

    async fn mark_consumed(
        &self,
        plan_execution_id: &PlanExecutionId,
        correlation_ids: Vec<CorrelationId>,
    ) -> StorageResult<()> {
        let mut table = self.correlations.write().await;
        for id in correlation_ids {
            table.consumed.insert(id, plan_execution_id.clone());
        }
        Ok(())
    }

    async fn is_consumed(&self, correlation_id: &CorrelationId) -> StorageResult<bool> {
        Ok(self.correlations.read().await.consumed.contains_key(correlation_id))
    }

    async fn prune_correlations(&self, plan_execution_id: &PlanExecutionId) -> StorageResult<usize> {
        let mut table = self.correlations.write().await;
        let before = table.waits.len() + table.consumed.len();

        let stale: Vec<CorrelationWait> = table
            .waits
            .values()
            .filter(|w| &w.plan_execution_id == plan_execution_id)
            .cloned()
            .collect();
        for wait in &stale {
            table.unindex(wait);
            table.waits.remove(&wait.node_execution_id);
        }
        table.consumed.retain(|_, plan| plan != plan_execution_id);

        Ok(before - table.waits.len() - table.consumed.len())
    }

    async fn prune_early_responses(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut table = self.correlations.write().await;
        let held = table.early.len();
        table.early.retain(|_, response| response.received_at >= before);
        Ok(held - table.early.len())
    }
}

impl Storage for InMemoryStorage {}
