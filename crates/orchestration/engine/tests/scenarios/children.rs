//! Scenario: nodes that spawn children.
//!
//! Covers parallel forks, fail-fast, bounded concurrency, single-child
//! sections and sequential section chains.

use crate::support::*;
use orchestration_types::{FacilitatorType, PlanNode, Status, StepType};
use serde_json::json;

// ---------------------------------------------------------------------------
// Fork
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fork_runs_every_child() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["matrix"],
            vec![
                fork("matrix", &["linux", "macos", "windows"]),
                task("linux", "ECHO", json!("linux")),
                task("macos", "ECHO", json!("macos")),
                task("windows", "ECHO", json!("windows")),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let matrix = only_execution(engine, &finished.uuid, "matrix").await;
    assert_eq!(matrix.status, Status::Succeeded);
    for child in ["linux", "macos", "windows"] {
        let node = only_execution(engine, &finished.uuid, child).await;
        assert_eq!(node.status, Status::Succeeded);
        assert_eq!(node.parent_id.as_ref(), Some(&matrix.uuid));
        assert_eq!(node.ambiance.depth(), matrix.ambiance.depth() + 1);
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn empty_fork_succeeds() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(engine, plan(&["nothing"], vec![fork("nothing", &[])])).await;

    assert_eq!(finished.status, Status::Succeeded);

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_child_fails_parent() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["checks"],
            vec![
                fork("checks", &["unit", "integration"]),
                task("unit", "ECHO", json!({})),
                task("integration", "FAIL", json!({"message": "db migration"})),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    let checks = only_execution(engine, &finished.uuid, "checks").await;
    assert_eq!(checks.status, Status::Failed);
    assert_eq!(
        checks.failure_info.expect("failure recorded").message,
        "db migration"
    );
    assert_eq!(
        only_execution(engine, &finished.uuid, "unit").await.status,
        Status::Succeeded
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fail_fast_discontinues_siblings() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["race"],
            vec![
                PlanNode::new("race", StepType::new("FORK"))
                    .with_parameters(json!({"childNodeIds": ["broken", "slow"], "failFast": true})),
                task("broken", "FAIL", json!({})),
                task("slow", "SLEEP", json!({"millis": 60_000})),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    assert_eq!(
        only_execution(engine, &finished.uuid, "race").await.status,
        Status::Failed
    );
    assert_eq!(
        only_execution(engine, &finished.uuid, "slow").await.status,
        Status::Discontinued
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn max_concurrency_runs_children_in_turn() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["batch"],
            vec![
                PlanNode::new("batch", StepType::new("FORK"))
                    .with_parameters(json!({"childNodeIds": ["one", "two", "three"], "maxConcurrency": 1})),
                task("one", "SLEEP", json!({"millis": 1_000})),
                task("two", "SLEEP", json!({"millis": 1_000})),
                task("three", "SLEEP", json!({"millis": 1_000})),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let mut children = Vec::new();
    for id in ["one", "two", "three"] {
        children.push(only_execution(engine, &finished.uuid, id).await);
    }
    children.sort_by_key(|c| c.start_ts);
    for pair in children.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        assert!(earlier.end_ts <= later.start_ts, "children overlapped");
    }

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn section_runs_its_child_chain() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["stage"],
            vec![
                PlanNode::new("stage", StepType::new("SECTION"))
                    .with_parameters(json!({"childNodeId": "prepare"})),
                task("prepare", "ECHO", json!({})).with_adviser(then("apply")),
                noop("apply"),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let stage = only_execution(engine, &finished.uuid, "stage").await;
    let apply = only_execution(engine, &finished.uuid, "apply").await;
    // the successor stays under the section and reports through it
    assert_eq!(apply.parent_id.as_ref(), Some(&stage.uuid));
    assert_eq!(stage.status, Status::Succeeded);

    handle.shutdown().await;
}

#[tokio::test]
async fn section_chain_runs_children_sequentially() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["rollout"],
            vec![
                PlanNode::new("rollout", StepType::new("SECTION_CHAIN"))
                    .with_facilitator(mode(FacilitatorType::CHILD_CHAIN))
                    .with_parameters(json!({"childNodeIds": ["canary", "fleet"]})),
                task("canary", "ECHO", json!({})),
                task("fleet", "ECHO", json!({})),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let canary = only_execution(engine, &finished.uuid, "canary").await;
    let fleet = only_execution(engine, &finished.uuid, "fleet").await;
    assert!(canary.end_ts <= fleet.start_ts);

    handle.shutdown().await;
}

#[tokio::test]
async fn section_chain_stops_at_failed_link() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["rollout"],
            vec![
                PlanNode::new("rollout", StepType::new("SECTION_CHAIN"))
                    .with_parameters(json!({"childNodeIds": ["canary", "fleet"]})),
                task("canary", "FAIL", json!({"message": "error budget"})),
                task("fleet", "ECHO", json!({})),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    assert!(executions_of(engine, &finished.uuid, "fleet").await.is_empty());

    handle.shutdown().await;
}
