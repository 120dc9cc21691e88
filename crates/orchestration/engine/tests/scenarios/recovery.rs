//! Scenario: the engine settling nodes when its own machinery fails.
//!
//! Storage that fails a write, advisers that error, malformed obtainment
//! parameters and retries of a finished child under a running parent.

use crate::support::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestration_engine::storage::{
    CorrelationStorage, InterruptStorage, NodeExecutionStorage, OutputStorage,
    PlanExecutionStorage,
};
use orchestration_engine::{
    Adviser, AdvisingEvent, EngineBuilder, EngineConfig, InMemoryStorage, OrchestrationEngine,
    Storage,
};
use orchestration_types::{
    AdviserResponse, AdviserType, CorrelationId, CorrelationWait, EarlyResponse, FailureType,
    Interrupt, InterruptId, InterruptRequest, InterruptState, InterruptType, NodeExecution,
    NodeExecutionId, OrchestrationError, OrchestrationResult, OutputInstance, PlanExecution,
    PlanExecutionId, RefType, SetupAbstractions, Status, StorageError, StorageResult,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// In-memory storage whose first write moving a node to `EXECUTING` fails
struct FlakyStorage {
    inner: InMemoryStorage,
    armed: AtomicBool,
}

impl FlakyStorage {
    fn new() -> Self {
        Self {
            inner: InMemoryStorage::new(),
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl PlanExecutionStorage for FlakyStorage {
    async fn create_plan_execution(&self, execution: PlanExecution) -> StorageResult<()> {
        self.inner.create_plan_execution(execution).await
    }

    async fn get_plan_execution(&self, id: &PlanExecutionId) -> StorageResult<Option<PlanExecution>> {
        self.inner.get_plan_execution(id).await
    }

    async fn replace_plan_execution(&self, execution: PlanExecution) -> StorageResult<PlanExecution> {
        self.inner.replace_plan_execution(execution).await
    }

    async fn list_plan_executions(&self) -> StorageResult<Vec<PlanExecution>> {
        self.inner.list_plan_executions().await
    }
}

#[async_trait]
impl NodeExecutionStorage for FlakyStorage {
    async fn create_node_execution(&self, execution: NodeExecution) -> StorageResult<()> {
        self.inner.create_node_execution(execution).await
    }

    async fn get_node_execution(&self, id: &NodeExecutionId) -> StorageResult<Option<NodeExecution>> {
        self.inner.get_node_execution(id).await
    }

    async fn replace_node_execution(&self, execution: NodeExecution) -> StorageResult<NodeExecution> {
        if execution.status == Status::Executing && self.armed.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.replace_node_execution(execution).await
    }

    async fn list_node_executions(
        &self,
        plan_execution_id: &PlanExecutionId,
    ) -> StorageResult<Vec<NodeExecution>> {
        self.inner.list_node_executions(plan_execution_id).await
    }

    async fn list_children(&self, parent_id: &NodeExecutionId) -> StorageResult<Vec<NodeExecution>> {
        self.inner.list_children(parent_id).await
    }
}

#[async_trait]
impl InterruptStorage for FlakyStorage {
    async fn create_interrupt(&self, interrupt: Interrupt) -> StorageResult<()> {
        self.inner.create_interrupt(interrupt).await
    }

    async fn get_interrupt(&self, id: &InterruptId) -> StorageResult<Option<Interrupt>> {
        self.inner.get_interrupt(id).await
    }

    async fn replace_interrupt(&self, interrupt: Interrupt) -> StorageResult<Interrupt> {
        self.inner.replace_interrupt(interrupt).await
    }

    async fn list_interrupts(&self, plan_execution_id: &PlanExecutionId) -> StorageResult<Vec<Interrupt>> {
        self.inner.list_interrupts(plan_execution_id).await
    }
}

#[async_trait]
impl OutputStorage for FlakyStorage {
    async fn save_output(&self, output: OutputInstance) -> StorageResult<()> {
        self.inner.save_output(output).await
    }

    async fn list_outputs(
        &self,
        plan_execution_id: &PlanExecutionId,
        ref_type: &RefType,
        name: &str,
    ) -> StorageResult<Vec<OutputInstance>> {
        self.inner.list_outputs(plan_execution_id, ref_type, name).await
    }
}

#[async_trait]
impl CorrelationStorage for FlakyStorage {
    async fn save_wait(&self, wait: CorrelationWait) -> StorageResult<()> {
        self.inner.save_wait(wait).await
    }

    async fn get_wait(&self, node_execution_id: &NodeExecutionId) -> StorageResult<Option<CorrelationWait>> {
        self.inner.get_wait(node_execution_id).await
    }

    async fn remove_wait(&self, node_execution_id: &NodeExecutionId) -> StorageResult<Option<CorrelationWait>> {
        self.inner.remove_wait(node_execution_id).await
    }

    async fn find_wait(&self, correlation_id: &CorrelationId) -> StorageResult<Option<CorrelationWait>> {
        self.inner.find_wait(correlation_id).await
    }

    async fn save_early_response(&self, response: EarlyResponse) -> StorageResult<()> {
        self.inner.save_early_response(response).await
    }

    async fn get_early_response(&self, correlation_id: &CorrelationId) -> StorageResult<Option<EarlyResponse>> {
        self.inner.get_early_response(correlation_id).await
    }

    async fn take_early_response(&self, correlation_id: &CorrelationId) -> StorageResult<Option<EarlyResponse>> {
        self.inner.take_early_response(correlation_id).await
    }

    async fn mark_consumed(
        &self,
        plan_execution_id: &PlanExecutionId,
        correlation_ids: Vec<CorrelationId>,
    ) -> StorageResult<()> {
        self.inner.mark_consumed(plan_execution_id, correlation_ids).await
    }

    async fn is_consumed(&self, correlation_id: &CorrelationId) -> StorageResult<bool> {
        self.inner.is_consumed(correlation_id).await
    }

    async fn prune_correlations(&self, plan_execution_id: &PlanExecutionId) -> StorageResult<usize> {
        self.inner.prune_correlations(plan_execution_id).await
    }

    async fn prune_early_responses(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.prune_early_responses(before).await
    }
}

impl Storage for FlakyStorage {}

/// Accepts every status, then errors
struct BrokenAdviser;

impl Adviser for BrokenAdviser {
    fn can_advise(&self, _event: &AdvisingEvent<'_>) -> bool {
        true
    }

    fn on_advise_event(&self, _event: &AdvisingEvent<'_>) -> OrchestrationResult<AdviserResponse> {
        Err(OrchestrationError::InvalidPlan("routing table missing".to_string()))
    }
}

async fn processed(engine: &OrchestrationEngine, id: &InterruptId) -> Interrupt {
    tokio::time::timeout(LIMIT, async {
        loop {
            let interrupt = engine.interrupt(id).await.unwrap();
            if interrupt.state.is_processed() {
                return interrupt;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("interrupt was never processed")
}

// ---------------------------------------------------------------------------
// Failed events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_storage_write_fails_node_and_advises_it() {
    let handle = EngineBuilder::new(EngineConfig::default())
        .with_storage(Arc::new(FlakyStorage::new()))
        .with_task_executor(Arc::new(make_executor(0)))
        .start()
        .unwrap();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["sync"],
            vec![noop("sync").with_adviser(adviser(AdviserType::RETRY, json!({"retryCount": 1})))],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let attempts = executions_of(engine, &finished.uuid, "sync").await;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, Status::Failed);
    let failure = attempts[0].failure_info.as_ref().unwrap();
    assert!(failure.has_type(FailureType::Engine));
    assert!(failure.message.contains("disk full"));
    assert_eq!(attempts[1].status, Status::Succeeded);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn adviser_error_fails_plan() {
    let handle = EngineBuilder::new(EngineConfig::default())
        .with_task_executor(Arc::new(make_executor(0)))
        .with_adviser(AdviserType::new("BROKEN"), Arc::new(BrokenAdviser))
        .start()
        .unwrap();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["route"],
            vec![
                noop("route")
                    .with_adviser(adviser(AdviserType::new("BROKEN"), json!({})))
                    .with_adviser(then("deliver")),
                noop("deliver"),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    let failure = finished.failure_info.unwrap();
    assert!(failure.message.contains("advising route"));
    assert!(failure.has_type(FailureType::Engine));
    assert_eq!(
        only_execution(engine, &finished.uuid, "route").await.status,
        Status::Succeeded
    );
    assert!(executions_of(engine, &finished.uuid, "deliver").await.is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_adviser_parameters_rejected_at_start() {
    let handle = start_engine();
    let engine = handle.engine();

    let err = engine
        .start_execution(
            plan(
                &["a"],
                vec![
                    noop("a").with_adviser(adviser(AdviserType::ON_SUCCESS, json!({"nextNodeId": 5}))),
                    noop("b"),
                ],
            ),
            SetupAbstractions::new(),
        )
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("malformed adviser parameters"));

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Retrying a finished child
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn retried_child_reports_to_waiting_parent() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(
                &["par"],
                vec![
                    fork("par", &["bad", "slow"]),
                    task("bad", "FAIL", json!({"message": "bad input"})),
                    task("slow", "SLEEP", json!({"millis": 60_000})),
                ],
            ),
            SetupAbstractions::new(),
        )
        .await
        .unwrap();
    let bad = wait_for_node(engine, &execution.uuid, "bad", Status::Failed).await;
    wait_for_node(engine, &execution.uuid, "slow", Status::Executing).await;

    engine
        .register_interrupt(
            InterruptRequest::new(InterruptType::Retry, execution.uuid.clone())
                .for_node(bad.uuid.clone())
                .with_parameters(json!({"taskType": "ECHO", "parameters": {}})),
        )
        .await
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Succeeded);
    let attempts = executions_of(engine, &finished.uuid, "bad").await;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, Status::Failed);
    assert_eq!(attempts[1].status, Status::Succeeded);
    assert_eq!(attempts[0].notify_id, attempts[1].notify_id);
    assert_eq!(
        only_execution(engine, &finished.uuid, "par").await.status,
        Status::Succeeded
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_rejected_once_parent_moved_on() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(
                &["par", "hold"],
                vec![
                    fork("par", &["bad"]),
                    task("bad", "FAIL", json!({})),
                    task("hold", "SLEEP", json!({"millis": 60_000})),
                ],
            ),
            SetupAbstractions::new(),
        )
        .await
        .unwrap();
    wait_for_node(engine, &execution.uuid, "par", Status::Failed).await;
    let bad = only_execution(engine, &execution.uuid, "bad").await;

    let interrupt = engine
        .register_interrupt(
            InterruptRequest::new(InterruptType::Retry, execution.uuid.clone())
                .for_node(bad.uuid.clone()),
        )
        .await
        .unwrap();
    let processed = processed(engine, &interrupt.uuid).await;
    assert_eq!(processed.state, InterruptState::ProcessedUnsuccessfully);
    assert!(processed.failure_reason.unwrap().contains("no longer waits"));
    // the claim is rolled back
    let bad = engine.node_execution(&bad.uuid).await.unwrap();
    assert!(bad.new_retry_id.is_none());

    let finished = finished(engine, &execution.uuid).await;
    assert_eq!(finished.status, Status::Failed);
    assert_eq!(executions_of(engine, &finished.uuid, "bad").await.len(), 1);

    handle.shutdown().await;
}
