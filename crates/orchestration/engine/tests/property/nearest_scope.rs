//! Property tests: output resolution picks the nearest visible scope.

use chrono::{Duration, TimeZone, Utc};
use orchestration_engine::resolver::select_nearest;
use orchestration_types::{
    NodeExecutionId, OutputInstance, OutputInstanceId, PlanExecutionId, PlanNodeId, RefType,
};
use proptest::prelude::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn make_path(len: usize) -> Vec<NodeExecutionId> {
    (0..len).map(|i| NodeExecutionId::new(format!("level-{}", i))).collect()
}

fn make_output(index: usize, producer: &str, scope: Vec<NodeExecutionId>) -> OutputInstance {
    OutputInstance {
        uuid: OutputInstanceId::new(format!("out-{}", index)),
        plan_execution_id: PlanExecutionId::new("plan"),
        ref_type: RefType::OUTCOME,
        name: "artifact".into(),
        producer_id: NodeExecutionId::new(format!("producer-{}", index)),
        producer_setup_id: PlanNodeId::new(producer),
        group_name: None,
        scope,
        value: json!(index),
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(index as i64),
    }
}

/// A candidate either on the requester's path (a prefix of it) or in a
/// sibling branch that diverges at some depth
#[derive(Clone, Debug)]
enum Placement {
    Prefix(usize),
    Sibling(usize),
}

fn arb_placement(depth: usize) -> impl Strategy<Value = Placement> {
    prop_oneof![
        (0..=depth).prop_map(Placement::Prefix),
        (0..depth).prop_map(Placement::Sibling),
    ]
}

fn scope_for(path: &[NodeExecutionId], placement: &Placement, index: usize) -> Vec<NodeExecutionId> {
    match placement {
        Placement::Prefix(len) => path[..*len].to_vec(),
        Placement::Sibling(at) => {
            let mut scope = path[..*at].to_vec();
            scope.push(NodeExecutionId::new(format!("branch-{}", index)));
            scope
        }
    }
}

fn arb_case() -> impl Strategy<Value = (usize, Vec<Placement>)> {
    (1usize..6).prop_flat_map(|depth| {
        (Just(depth), prop::collection::vec(arb_placement(depth), 0..8))
    })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn nearest_visible_scope_wins((depth, placements) in arb_case()) {
        let requester = make_path(depth);
        let candidates: Vec<OutputInstance> = placements
            .iter()
            .enumerate()
            .map(|(i, p)| make_output(i, "build", scope_for(&requester, p, i)))
            .collect();

        let longest_prefix = placements
            .iter()
            .filter_map(|p| match p {
                Placement::Prefix(len) => Some(*len),
                Placement::Sibling(_) => None,
            })
            .max();

        match (select_nearest(&requester, &candidates, None), longest_prefix) {
            (Some(found), Some(len)) => {
                prop_assert!(requester.starts_with(&found.scope));
                prop_assert_eq!(found.scope.len(), len);
            }
            (None, None) => {}
            (found, expected) => prop_assert!(false, "found {:?}, expected prefix {:?}", found, expected),
        }
    }

    #[test]
    fn named_producer_outside_scope_resolves_latest(depth in 1usize..5, count in 1usize..6) {
        let requester = make_path(depth);
        let candidates: Vec<OutputInstance> = (0..count)
            .map(|i| make_output(i, "report", vec![NodeExecutionId::new(format!("elsewhere-{}", i))]))
            .collect();

        let producer = PlanNodeId::new("report");
        let found = select_nearest(&requester, &candidates, Some(&producer));
        prop_assert_eq!(found.map(|o| o.uuid.clone()), Some(OutputInstanceId::new(format!("out-{}", count - 1))));

        let other = PlanNodeId::new("unrelated");
        prop_assert!(select_nearest(&requester, &candidates, Some(&other)).is_none());
        prop_assert!(select_nearest(&requester, &candidates, None).is_none());
    }
}
