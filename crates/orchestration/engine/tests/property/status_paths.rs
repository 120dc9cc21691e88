//! Property tests: node status transitions and status aggregation.
//!
//! Random plans run on a live engine only ever move their nodes along
//! declared edges, and aggregation is order independent and never loses a
//! failure.

use crate::support::{adviser, finished, fork, noop, start_engine_with, task, then};
use orchestration_engine::EngineConfig;
use orchestration_types::{
    aggregate_status, AdviserType, InterruptRequest, InterruptType, NodeExecutionId, Plan,
    PlanNode, PlanNodeId, SetupAbstractions, Status, StatusUpdate,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn arb_status() -> impl Strategy<Value = Status> {
    (0..Status::ALL.len()).prop_map(|i| Status::ALL[i])
}

fn arb_final_status() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Succeeded),
        Just(Status::Failed),
        Just(Status::Expired),
        Just(Status::Aborted),
        Just(Status::Discontinued),
        Just(Status::Skipped),
        Just(Status::IgnoreFailed),
    ]
}

/// Statuses that no declared edge leaves
const SINKS: [Status; 5] = [
    Status::Succeeded,
    Status::Aborted,
    Status::Discontinued,
    Status::Skipped,
    Status::IgnoreFailed,
];

#[derive(Clone, Debug)]
enum Leaf {
    Noop,
    Echo,
    Fail,
    Sleep(u64),
}

#[derive(Clone, Debug)]
enum Shape {
    Leaf(Leaf, bool),
    Fork(Vec<Leaf>, bool),
}

#[derive(Clone, Debug)]
struct Scenario {
    steps: Vec<Shape>,
    abort_after: Option<u64>,
}

fn arb_leaf() -> impl Strategy<Value = Leaf> {
    prop_oneof![
        Just(Leaf::Noop),
        Just(Leaf::Echo),
        Just(Leaf::Fail),
        (1u64..5_000).prop_map(Leaf::Sleep),
    ]
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        3 => (arb_leaf(), any::<bool>()).prop_map(|(leaf, retry)| Shape::Leaf(leaf, retry)),
        1 => (prop::collection::vec(arb_leaf(), 1..4), any::<bool>())
            .prop_map(|(children, fail_fast)| Shape::Fork(children, fail_fast)),
    ]
}

fn arb_scenario() -> impl Strategy<Value = Scenario> {
    (
        prop::collection::vec(arb_shape(), 1..5),
        prop::option::of(0u64..6_000),
    )
        .prop_map(|(steps, abort_after)| Scenario { steps, abort_after })
}

fn leaf_node(id: &str, leaf: &Leaf) -> PlanNode {
    match leaf {
        Leaf::Noop => noop(id),
        Leaf::Echo => task(id, "ECHO", json!({ "step": id })),
        Leaf::Fail => task(id, "FAIL", json!({ "message": id })),
        Leaf::Sleep(millis) => task(id, "SLEEP", json!({ "millis": millis })),
    }
}

/// A chain of the scenario's steps, each handing over on success
fn make_plan(scenario: &Scenario) -> Plan {
    let mut nodes = Vec::new();
    let count = scenario.steps.len();
    for (i, shape) in scenario.steps.iter().enumerate() {
        let id = format!("s{}", i);
        let mut node = match shape {
            Shape::Leaf(leaf, retry) => {
                let node = leaf_node(&id, leaf);
                if *retry {
                    node.with_adviser(adviser(AdviserType::RETRY, json!({"retryCount": 1})))
                } else {
                    node
                }
            }
            Shape::Fork(children, fail_fast) => {
                let ids: Vec<String> = (0..children.len()).map(|c| format!("{}c{}", id, c)).collect();
                for (child_id, leaf) in ids.iter().zip(children) {
                    nodes.push(leaf_node(child_id, leaf));
                }
                let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                fork(&id, &refs).with_parameters(json!({
                    "childNodeIds": refs,
                    "failFast": fail_fast,
                }))
            }
        };
        if i + 1 < count {
            node = node.with_adviser(then(&format!("s{}", i + 1)));
        }
        nodes.push(node);
    }
    Plan::from_nodes(vec![PlanNodeId::new("s0")], nodes).unwrap()
}

/// Every node update of one run, grouped per node and ordered by version
fn run_scenario(scenario: &Scenario) -> HashMap<NodeExecutionId, Vec<(u64, Status, Status)>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    runtime.block_on(async {
        let config = EngineConfig::default().with_status_channel_capacity(16_384);
        let handle = start_engine_with(config, 0);
        let engine = handle.engine();
        let mut updates = engine.subscribe();

        let execution = engine
            .start_execution(make_plan(scenario), SetupAbstractions::new())
            .await
            .unwrap();
        if let Some(millis) = scenario.abort_after {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            // the plan may already be over
            let _ = engine
                .register_interrupt(InterruptRequest::new(InterruptType::AbortAll, execution.uuid.clone()))
                .await;
        }
        let finished = finished(engine, &execution.uuid).await;
        assert!(finished.status.is_final());
        handle.shutdown().await;

        let mut per_node: HashMap<NodeExecutionId, Vec<(u64, Status, Status)>> = HashMap::new();
        while let Ok(update) = updates.try_recv() {
            if let StatusUpdate::Node {
                node_execution_id,
                from,
                to,
                version,
                ..
            } = update
            {
                per_node.entry(node_execution_id).or_default().push((version, from, to));
            }
        }
        for changes in per_node.values_mut() {
            changes.sort_by_key(|(version, _, _)| *version);
        }
        per_node
    })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn live_runs_follow_declared_edges(scenario in arb_scenario()) {
        let per_node = run_scenario(&scenario);
        prop_assert!(!per_node.is_empty());
        for (id, changes) in &per_node {
            let mut current = Status::Queued;
            for (_, from, to) in changes {
                prop_assert!(
                    from.can_transition_to(*to),
                    "{} moved {} -> {}, not a declared edge",
                    id, from, to
                );
                prop_assert_eq!(*from, current, "{} skipped a reported status", id);
                current = *to;
            }
        }
    }
}

proptest! {
    #[test]
    fn sinks_have_no_outgoing_edges(sink in 0..SINKS.len(), target in arb_status()) {
        prop_assert!(!SINKS[sink].can_transition_to(target));
    }

    #[test]
    fn aggregate_ignores_order(statuses in prop::collection::vec(arb_status(), 0..12)) {
        let forward = aggregate_status(statuses.iter().copied());
        let backward = aggregate_status(statuses.iter().rev().copied());
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn aggregate_of_final_statuses_is_final(statuses in prop::collection::vec(arb_final_status(), 0..12)) {
        prop_assert!(aggregate_status(statuses).is_final());
    }

    #[test]
    fn aggregate_succeeds_only_when_all_positive(statuses in prop::collection::vec(arb_status(), 0..12)) {
        let aggregate = aggregate_status(statuses.iter().copied());
        let all_positive = statuses.iter().all(|s| s.is_positive());
        prop_assert_eq!(aggregate == Status::Succeeded, all_positive);
    }

    #[test]
    fn aggregate_keeps_worst_failure(
        statuses in prop::collection::vec(arb_final_status(), 0..12),
        failure in prop_oneof![Just(Status::Failed), Just(Status::Expired), Just(Status::Aborted)],
    ) {
        let mut with_failure = statuses;
        with_failure.push(failure);
        let aggregate = aggregate_status(with_failure);
        prop_assert!(aggregate.is_final());
        prop_assert!(!aggregate.is_positive());
        if failure == Status::Aborted {
            prop_assert_eq!(aggregate, Status::Aborted);
        }
    }
}
