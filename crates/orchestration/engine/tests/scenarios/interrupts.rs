//! Scenario: operator interrupts.
//!
//! Abort and pause at node and plan scope, and the checks that reject
//! interrupts which cannot apply.

use crate::support::*;
use orchestration_types::{
    InterruptRequest, InterruptState, InterruptType, NodeExecutionId, OrchestrationError,
    PlanExecutionId, PlanNode, Status, StatusUpdate, StepType,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request(
    interrupt_type: InterruptType,
    plan_execution_id: &PlanExecutionId,
    node: Option<&NodeExecutionId>,
) -> InterruptRequest {
    let request = InterruptRequest::new(interrupt_type, plan_execution_id.clone()).issued_by("ops");
    match node {
        Some(id) => request.for_node(id.clone()),
        None => request,
    }
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn abort_all_aborts_running_plan() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(&["serve"], vec![task("serve", "SLEEP", json!({"millis": 600_000}))]),
            Default::default(),
        )
        .await
        .unwrap();
    let serve = wait_for_node(engine, &execution.uuid, "serve", Status::Executing).await;

    let interrupt = engine
        .register_interrupt(request(InterruptType::AbortAll, &execution.uuid, None))
        .await
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Aborted);
    let serve = engine.node_execution(&serve.uuid).await.unwrap();
    assert_eq!(serve.status, Status::Aborted);

    let processed = engine.interrupt(&interrupt.uuid).await.unwrap();
    assert_eq!(processed.state, InterruptState::ProcessedSuccessfully);
    assert_eq!(processed.effects.len(), 1);
    assert_eq!(processed.effects[0].from_status, Status::Executing);
    assert_eq!(processed.effects[0].to_status, Status::Aborted);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn aborting_one_child_aborts_its_parent() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(
                &["shards"],
                vec![
                    fork("shards", &["east", "west"]),
                    task("east", "SLEEP", json!({"millis": 60_000})),
                    task("west", "SLEEP", json!({"millis": 60_000})),
                ],
            ),
            Default::default(),
        )
        .await
        .unwrap();
    let east = wait_for_node(engine, &execution.uuid, "east", Status::Executing).await;
    wait_for_node(engine, &execution.uuid, "west", Status::Executing).await;

    engine
        .register_interrupt(request(InterruptType::Abort, &execution.uuid, Some(&east.uuid)))
        .await
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Aborted);
    assert_eq!(
        only_execution(engine, &finished.uuid, "east").await.status,
        Status::Aborted
    );
    assert_eq!(
        only_execution(engine, &finished.uuid, "shards").await.status,
        Status::Aborted
    );
    assert!(only_execution(engine, &finished.uuid, "west")
        .await
        .status
        .is_final());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn aborting_section_settles_child_first() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(
                &["stage"],
                vec![
                    PlanNode::new("stage", StepType::new("SECTION"))
                        .with_parameters(json!({"childNodeId": "migrate"})),
                    task("migrate", "SLEEP", json!({"millis": 600_000})),
                ],
            ),
            Default::default(),
        )
        .await
        .unwrap();
    let migrate = wait_for_node(engine, &execution.uuid, "migrate", Status::Executing).await;
    let stage = only_execution(engine, &execution.uuid, "stage").await;

    let mut updates = engine.subscribe();
    let interrupt = engine
        .register_interrupt(request(InterruptType::Abort, &execution.uuid, Some(&stage.uuid)))
        .await
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;
    assert_eq!(finished.status, Status::Aborted);

    let mut aborted = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if let StatusUpdate::Node {
            node_execution_id,
            to: Status::Aborted,
            ..
        } = update
        {
            aborted.push(node_execution_id);
        }
    }
    assert_eq!(aborted, vec![migrate.uuid.clone(), stage.uuid.clone()]);

    let processed = engine.interrupt(&interrupt.uuid).await.unwrap();
    assert_eq!(processed.state, InterruptState::ProcessedSuccessfully);
    let order: Vec<&NodeExecutionId> = processed.effects.iter().map(|e| &e.node_execution_id).collect();
    assert_eq!(order, vec![&migrate.uuid, &stage.uuid]);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Pause
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn pause_all_holds_result_until_resume() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(
                &["build"],
                vec![
                    task("build", "SLEEP", json!({"millis": 1_000})).with_adviser(then("ship")),
                    noop("ship"),
                ],
            ),
            Default::default(),
        )
        .await
        .unwrap();
    wait_for_node(engine, &execution.uuid, "build", Status::Executing).await;

    engine
        .register_interrupt(request(InterruptType::PauseAll, &execution.uuid, None))
        .await
        .unwrap();
    // the task result arrives while pausing; the node parks with it
    let build = wait_for_node(engine, &execution.uuid, "build", Status::Paused).await;
    assert!(build.pending.is_some());
    assert_eq!(
        engine.plan_execution(&execution.uuid).await.unwrap().status,
        Status::Paused
    );
    assert!(executions_of(engine, &execution.uuid, "ship").await.is_empty());

    engine
        .register_interrupt(request(InterruptType::ResumeAll, &execution.uuid, None))
        .await
        .unwrap();
    let finished = finished(engine, &execution.uuid).await;

    assert_eq!(finished.status, Status::Succeeded);
    assert_eq!(
        only_execution(engine, &finished.uuid, "ship").await.status,
        Status::Succeeded
    );
    let build = engine.node_execution(&build.uuid).await.unwrap();
    assert_eq!(build.status, Status::Succeeded);
    assert_eq!(build.interrupt_history.len(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_rejected_for_parent_node() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(
                &["group"],
                vec![fork("group", &["member"]), task("member", "SLEEP", json!({"millis": 600_000}))],
            ),
            Default::default(),
        )
        .await
        .unwrap();
    let group = wait_for_node(engine, &execution.uuid, "group", Status::Executing).await;

    let err = engine
        .register_interrupt(request(InterruptType::Pause, &execution.uuid, Some(&group.uuid)))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InterruptRejected(_)));

    engine
        .register_interrupt(request(InterruptType::AbortAll, &execution.uuid, None))
        .await
        .unwrap();
    assert_eq!(finished(engine, &execution.uuid).await.status, Status::Aborted);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interrupts_rejected_after_plan_finishes() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(engine, plan(&["done"], vec![noop("done")])).await;
    let err = engine
        .register_interrupt(request(InterruptType::AbortAll, &finished.uuid, None))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InterruptRejected(_)));

    handle.shutdown().await;
}

#[tokio::test]
async fn node_interrupt_needs_a_node() {
    let handle = start_engine();
    let engine = handle.engine();

    let execution = engine
        .start_execution(
            plan(&["wait"], vec![task("wait", "SLEEP", json!({"millis": 60_000}))]),
            Default::default(),
        )
        .await
        .unwrap();

    for interrupt_type in [InterruptType::Pause, InterruptType::Retry, InterruptType::Expire] {
        let err = engine
            .register_interrupt(request(interrupt_type, &execution.uuid, None))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InterruptRejected(_)));
    }

    engine
        .register_interrupt(request(InterruptType::AbortAll, &execution.uuid, None))
        .await
        .unwrap();
    assert_eq!(finished(engine, &execution.uuid).await.status, Status::Aborted);

    handle.shutdown().await;
}
