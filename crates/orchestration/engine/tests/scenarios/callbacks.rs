//! Scenario: callbacks, task chains and references between nodes.
//!
//! Async steps suspend on correlation ids answered through the engine;
//! task chains delegate one round at a time; consumers read outcomes of
//! earlier nodes through their references.

use crate::support::*;
use async_trait::async_trait;
use orchestration_engine::step::{AsyncExecutable, AsyncResponse, SyncExecutable};
use orchestration_engine::{EngineBuilder, EngineConfig, EngineHandle, OrchestrationEngine, Step, StepContext};
use orchestration_types::{
    CorrelationId, FacilitatorType, FailureInfo, InterruptRequest, InterruptType, NodeExecution,
    PlanExecutionId, PlanNode, RefObject, RefType, ResponseData, ResponseDataMap,
    SetupAbstractions, Status, StepResponse, StepResult, StepType,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Waits on the change ticket named in its parameters
#[derive(Default)]
struct ApprovalStep {
    aborted: AtomicUsize,
}

impl Step for ApprovalStep {
    fn as_async(&self) -> Option<&dyn AsyncExecutable> {
        Some(self)
    }
}

#[async_trait]
impl AsyncExecutable for ApprovalStep {
    async fn execute_async(&self, ctx: &StepContext) -> StepResult<AsyncResponse> {
        let ticket = ctx
            .parameters
            .get("ticket")
            .and_then(Value::as_str)
            .unwrap_or("ticket");
        Ok(AsyncResponse::new(vec![CorrelationId::new(ticket)]))
    }

    async fn handle_async_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseDataMap,
    ) -> StepResult<StepResponse> {
        let approved = responses
            .values()
            .filter_map(ResponseData::as_payload)
            .any(|payload| payload["approved"] == json!(true));
        Ok(if approved {
            StepResponse::success().with_outcome("approval", json!({"approved": true}))
        } else {
            StepResponse::failed(FailureInfo::application("change rejected"))
                .with_outcome("approval", json!({"approved": false}))
        })
    }

    async fn handle_abort(&self, _ctx: &StepContext, callback_ids: &[CorrelationId]) {
        self.aborted.fetch_add(callback_ids.len(), Ordering::SeqCst);
    }
}

/// Copies its first declared input into a `seen` outcome
struct InspectStep;

impl Step for InspectStep {
    fn as_sync(&self) -> Option<&dyn SyncExecutable> {
        Some(self)
    }
}

#[async_trait]
impl SyncExecutable for InspectStep {
    async fn execute_sync(&self, ctx: &StepContext) -> StepResult<StepResponse> {
        let name = ctx
            .plan_node
            .ref_objects
            .first()
            .map(|r| r.name.clone())
            .unwrap_or_default();
        let seen = ctx.inputs.get(&name)?.clone();
        Ok(StepResponse::success().with_outcome("seen", seen))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn start_engine_with_steps(approval: Arc<ApprovalStep>) -> EngineHandle {
    EngineBuilder::new(EngineConfig::default())
        .with_task_executor(Arc::new(make_executor(0)))
        .with_step(StepType::new("APPROVAL"), approval)
        .with_step(StepType::new("INSPECT"), Arc::new(InspectStep))
        .start()
        .unwrap()
}

fn gate(id: &str, ticket: &str) -> PlanNode {
    PlanNode::new(id, StepType::new("APPROVAL"))
        .with_facilitator(mode(FacilitatorType::ASYNC))
        .with_parameters(json!({ "ticket": ticket }))
}

fn inspect(id: &str, input: RefObject) -> PlanNode {
    PlanNode::new(id, StepType::new("INSPECT")).with_ref(input)
}

fn chain(id: &str, tasks: Value) -> PlanNode {
    PlanNode::new(id, StepType::new("DELEGATE"))
        .with_facilitator(mode(FacilitatorType::TASK_CHAIN))
        .with_parameters(json!({ "tasks": tasks }))
}

/// Wait until the node has suspended on its callbacks
async fn wait_until_suspended(
    engine: &OrchestrationEngine,
    plan_execution_id: &PlanExecutionId,
    plan_node: &str,
) -> NodeExecution {
    loop {
        let node = wait_for_node(engine, plan_execution_id, plan_node, Status::Executing).await;
        if node.last_executable_response().is_some() {
            // let the worker finish registering the wait
            tokio::time::sleep(Duration::from_millis(1)).await;
            return node;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn wait_for_dropped(engine: &OrchestrationEngine, expected: u64) {
    let reached = tokio::time::timeout(LIMIT, async {
        while engine.dropped_responses() < expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "dropped responses never reached {}", expected);
}

async fn output_value(engine: &OrchestrationEngine, id: &PlanExecutionId, name: &str) -> Value {
    let outputs = engine.outputs(id, &RefType::OUTCOME, name).await.unwrap();
    assert_eq!(outputs.len(), 1, "{} published {} times", name, outputs.len());
    outputs[0].value.clone()
}

// ---------------------------------------------------------------------------
// Async callbacks
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn async_step_resumes_on_callback() {
    let handle = start_engine_with_steps(Arc::default());
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(&["approve"], vec![gate("approve", "CHG-1").with_adviser(then("rollout")), noop("rollout")]),
            SetupAbstractions::new(),
        )
        .await
        .unwrap();
    wait_until_suspended(engine, &execution.uuid, "approve").await;
    assert!(executions_of(engine, &execution.uuid, "rollout").await.is_empty());

    engine
        .notify(CorrelationId::new("CHG-1"), ResponseData::payload(json!({"approved": true})))
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Succeeded);
    assert_eq!(
        only_execution(engine, &finished.uuid, "rollout").await.status,
        Status::Succeeded
    );
    assert_eq!(
        output_value(engine, &finished.uuid, "approval").await,
        json!({"approved": true})
    );

    // the ticket was consumed; a second answer is ignored
    engine
        .notify(CorrelationId::new("CHG-1"), ResponseData::payload(json!({"approved": false})))
        .unwrap();
    wait_for_dropped(engine, 1).await;
    assert_eq!(
        engine.plan_execution(&finished.uuid).await.unwrap().status,
        Status::Succeeded
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn early_callback_is_held_for_the_step() {
    let handle = start_engine_with_steps(Arc::default());
    let engine = handle.engine();

    engine
        .notify(CorrelationId::new("CHG-2"), ResponseData::payload(json!({"approved": true})))
        .unwrap();
    let finished = run_plan(engine, plan(&["approve"], vec![gate("approve", "CHG-2")])).await;

    assert_eq!(finished.status, Status::Succeeded);
    assert_eq!(engine.dropped_responses(), 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_callback_fails_node() {
    let handle = start_engine_with_steps(Arc::default());
    let engine = handle.engine();

    let execution = engine
        .start_execution(plan(&["approve"], vec![gate("approve", "CHG-3")]), SetupAbstractions::new())
        .await
        .unwrap();
    wait_until_suspended(engine, &execution.uuid, "approve").await;
    engine
        .notify(CorrelationId::new("CHG-3"), ResponseData::payload(json!({"approved": false})))
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Failed);
    let approve = only_execution(engine, &finished.uuid, "approve").await;
    assert_eq!(approve.failure_info.expect("failure recorded").message, "change rejected");
    // a failed node publishes nothing
    let outputs = engine
        .outputs(&finished.uuid, &RefType::OUTCOME, "approval")
        .await
        .unwrap();
    assert!(outputs.is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn abort_releases_outstanding_callbacks() {
    let approval = Arc::new(ApprovalStep::default());
    let handle = start_engine_with_steps(approval.clone());
    let engine = handle.engine();

    let execution = engine
        .start_execution(plan(&["approve"], vec![gate("approve", "CHG-4")]), SetupAbstractions::new())
        .await
        .unwrap();
    wait_until_suspended(engine, &execution.uuid, "approve").await;

    engine
        .register_interrupt(InterruptRequest::new(InterruptType::AbortAll, execution.uuid.clone()))
        .await
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Aborted);
    assert_eq!(approval.aborted.load(Ordering::SeqCst), 1);

    // late answers for an aborted wait are dropped
    engine
        .notify(CorrelationId::new("CHG-4"), ResponseData::payload(json!({"approved": true})))
        .unwrap();
    wait_for_dropped(engine, 1).await;

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Task chains
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_chain_collects_every_round() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["migrate"],
            vec![chain(
                "migrate",
                json!([
                    {"taskType": "ECHO", "parameters": {"step": "schema"}},
                    {"taskType": "ECHO", "parameters": {"step": "backfill"}},
                    {"taskType": "ECHO", "parameters": {"step": "cutover"}}
                ]),
            )],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let migrate = only_execution(engine, &finished.uuid, "migrate").await;
    assert_eq!(migrate.task_ids().len(), 3);
    assert_eq!(
        output_value(engine, &finished.uuid, "output").await,
        json!([{"step": "schema"}, {"step": "backfill"}, {"step": "cutover"}])
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn task_chain_stops_at_failed_round() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["migrate"],
            vec![chain(
                "migrate",
                json!([
                    {"taskType": "ECHO", "parameters": {}},
                    {"taskType": "FAIL", "parameters": {"message": "lock timeout"}},
                    {"taskType": "ECHO", "parameters": {}}
                ]),
            )],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    let migrate = only_execution(engine, &finished.uuid, "migrate").await;
    assert_eq!(migrate.task_ids().len(), 2);
    assert_eq!(migrate.failure_info.expect("failure recorded").message, "lock timeout");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consumer_reads_named_producer_outcome() {
    let handle = start_engine_with_steps(Arc::default());
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["build"],
            vec![
                task("build", "ECHO", json!({"digest": "sha256:abc"})).with_adviser(then("sign")),
                task("sign", "ECHO", json!({"digest": "sha256:def"})).with_adviser(then("verify")),
                inspect(
                    "verify",
                    RefObject::outcome("output").from_producer("build").with_key("digest"),
                ),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    // both siblings keep their own outcome
    let outputs = engine
        .outputs(&finished.uuid, &RefType::OUTCOME, "output")
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(output_value(engine, &finished.uuid, "seen").await, json!("sha256:abc"));

    handle.shutdown().await;
}

#[tokio::test]
async fn unnamed_producer_resolves_latest_sibling() {
    let handle = start_engine_with_steps(Arc::default());
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["build"],
            vec![
                task("build", "ECHO", json!("first")).with_adviser(then("rebuild")),
                task("rebuild", "ECHO", json!("second")).with_adviser(then("verify")),
                inspect("verify", RefObject::outcome("output")),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    assert_eq!(output_value(engine, &finished.uuid, "seen").await, json!("second"));

    handle.shutdown().await;
}

#[tokio::test]
async fn unresolved_reference_fails_consumer() {
    let handle = start_engine_with_steps(Arc::default());
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(&["verify"], vec![inspect("verify", RefObject::outcome("ghost"))]),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    let verify = only_execution(engine, &finished.uuid, "verify").await;
    assert!(verify.failure_info.is_some());

    handle.shutdown().await;
}
