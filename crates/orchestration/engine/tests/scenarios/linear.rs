//! Scenario: linear chains of nodes linked by advisers.
//!
//! Covers the happy path through facilitation, task delegation and
//! advising, plus failure propagation, ignored failures and skipping.

use crate::support::*;
use orchestration_types::{AdviserType, RefType, Status};
use serde_json::json;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chain_runs_in_order_and_succeeds() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["fetch"],
            vec![
                task("fetch", "ECHO", json!({"repo": "app"})).with_adviser(then("compile")),
                noop("compile").with_adviser(then("package")),
                noop("package"),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    assert!(finished.failure_info.is_none());
    assert!(finished.end_ts.is_some());

    let fetch = only_execution(engine, &finished.uuid, "fetch").await;
    let compile = only_execution(engine, &finished.uuid, "compile").await;
    let package = only_execution(engine, &finished.uuid, "package").await;
    assert_eq!(compile.previous_id.as_ref(), Some(&fetch.uuid));
    assert_eq!(package.previous_id.as_ref(), Some(&compile.uuid));
    assert_eq!(fetch.next_id.as_ref(), Some(&compile.uuid));
    for node in [&fetch, &compile, &package] {
        assert_eq!(node.status, Status::Succeeded);
        assert!(node.is_advised());
        assert!(node.start_ts.is_some() && node.end_ts.is_some());
    }

    let outputs = engine
        .outputs(&finished.uuid, &RefType::OUTCOME, "output")
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].value, json!({"repo": "app"}));
    assert_eq!(outputs[0].producer_id, fetch.uuid);

    handle.shutdown().await;
}

#[tokio::test]
async fn unadvised_failure_fails_plan() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["deploy"],
            vec![
                task("deploy", "FAIL", json!({"message": "cluster unreachable"}))
                    .with_adviser(then("notify")),
                noop("notify"),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    let failure = finished.failure_info.expect("failure recorded");
    assert_eq!(failure.message, "cluster unreachable");
    assert!(executions_of(engine, &finished.uuid, "notify").await.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn ignored_failure_continues_chain() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["lint"],
            vec![
                task("lint", "FAIL", json!({"message": "style"}))
                    .with_adviser(adviser(AdviserType::IGNORE, json!({"nextNodeId": "test"}))),
                noop("test"),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let lint = only_execution(engine, &finished.uuid, "lint").await;
    assert_eq!(lint.status, Status::IgnoreFailed);
    assert_eq!(
        only_execution(engine, &finished.uuid, "test").await.status,
        Status::Succeeded
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn on_fail_routes_to_recovery_node() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["migrate"],
            vec![
                task("migrate", "FAIL", json!({}))
                    .with_adviser(adviser(AdviserType::ON_FAIL, json!({"nextNodeId": "restore"}))),
                noop("restore"),
            ],
        ),
    )
    .await;

    // the recovery ran, but the chain still carries the failure
    assert_eq!(
        only_execution(engine, &finished.uuid, "restore").await.status,
        Status::Succeeded
    );
    assert_eq!(finished.status, Status::Failed);

    handle.shutdown().await;
}

#[tokio::test]
async fn skip_condition_skips_node() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["optional"],
            vec![
                task("optional", "FAIL", json!({}))
                    .with_skip_condition("TRUE")
                    .with_adviser(then("after")),
                noop("after"),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Succeeded);
    let optional = only_execution(engine, &finished.uuid, "optional").await;
    assert_eq!(optional.status, Status::Skipped);
    assert!(optional.mode.is_none());
    assert_eq!(
        only_execution(engine, &finished.uuid, "after").await.status,
        Status::Succeeded
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn unreadable_skip_condition_fails_node() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(&["gate"], vec![noop("gate").with_skip_condition("${env.SKIP}")]),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    assert!(finished
        .failure_info
        .expect("failure recorded")
        .message
        .contains("skip condition"));

    handle.shutdown().await;
}

#[tokio::test]
async fn independent_roots_finish_together() {
    let handle = start_engine();
    let engine = handle.engine();

    let finished = run_plan(
        engine,
        plan(
            &["frontend", "backend"],
            vec![
                task("frontend", "ECHO", json!(1)),
                task("backend", "FAIL", json!({"message": "linker"})),
            ],
        ),
    )
    .await;

    assert_eq!(finished.status, Status::Failed);
    assert_eq!(
        only_execution(engine, &finished.uuid, "frontend").await.status,
        Status::Succeeded
    );
    assert_eq!(finished.failure_info.expect("failure recorded").message, "linker");

    handle.shutdown().await;
}

#[tokio::test]
async fn invalid_plan_rejected_before_start() {
    let handle = start_engine();
    let engine = handle.engine();

    let result = engine
        .start_execution(
            plan(&["a"], vec![noop("a").with_adviser(then("missing"))]),
            Default::default(),
        )
        .await;
    assert!(result.is_err());

    handle.shutdown().await;
}
