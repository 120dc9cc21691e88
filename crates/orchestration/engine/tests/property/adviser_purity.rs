//! Property tests: advising is a pure function of the event.
//!
//! Consulting the registered advisers twice with the same event yields the
//! same response, and the advice never depends on the node's ambiance.

use orchestration_engine::adviser::{advise, AdvisingEvent};
use orchestration_engine::{EngineConfig, InMemoryStorage, Registries};
use orchestration_types::{
    AdviserObtainment, AdviserType, Ambiance, FailureInfo, Level, NodeExecutionId,
    PlanExecutionId, PlanNode, SetupAbstractions, Status, StepType,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn make_registries() -> Registries {
    Registries::with_defaults(Arc::new(InMemoryStorage::new()), &EngineConfig::default()).unwrap()
}

fn arb_obtainment() -> impl Strategy<Value = AdviserObtainment> {
    prop_oneof![
        Just(AdviserObtainment::new(AdviserType::ON_SUCCESS)
            .with_parameters(json!({"nextNodeId": "next"}))),
        Just(AdviserObtainment::new(AdviserType::ON_FAIL)
            .with_parameters(json!({"nextNodeId": "recover"}))),
        Just(AdviserObtainment::new(AdviserType::IGNORE)),
        Just(AdviserObtainment::new(AdviserType::MARK_SUCCESS)),
        Just(AdviserObtainment::new(AdviserType::ABORT)),
        (0u32..4).prop_map(|count| AdviserObtainment::new(AdviserType::RETRY)
            .with_parameters(json!({"retryCount": count, "waitIntervalSecs": [1, 5]}))),
        Just(AdviserObtainment::new(AdviserType::MANUAL_INTERVENTION)
            .with_parameters(json!({"timeoutSecs": 60, "repairAction": "IGNORE"}))),
    ]
}

fn arb_finished_status() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Succeeded),
        Just(Status::Failed),
        Just(Status::Expired),
        Just(Status::Skipped),
        Just(Status::IgnoreFailed),
    ]
}

fn make_event<'a>(
    ambiance: &'a Ambiance,
    node: &'a PlanNode,
    status: Status,
    failure: &'a FailureInfo,
    retry_ids: &'a [NodeExecutionId],
    parameters: &'a serde_json::Value,
) -> AdvisingEvent<'a> {
    AdvisingEvent {
        ambiance,
        plan_node: node,
        status,
        failure_info: (!status.is_positive()).then_some(failure),
        retry_ids,
        parameters,
    }
}

fn make_ambiance(run: &str, node: &PlanNode) -> Ambiance {
    Ambiance::new(PlanExecutionId::new(format!("plan-{}", run)), SetupAbstractions::new())
        .fork(Level::new(NodeExecutionId::new(run), node))
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn same_event_same_advice(
        obtainments in prop::collection::vec(arb_obtainment(), 0..4),
        status in arb_finished_status(),
        attempts in 0usize..5,
    ) {
        let registries = make_registries();
        let mut node = PlanNode::new("step", StepType::new("NOOP"));
        for obtainment in obtainments {
            node = node.with_adviser(obtainment);
        }
        let failure = FailureInfo::application("boom");
        let retry_ids: Vec<NodeExecutionId> = (0..attempts)
            .map(|i| NodeExecutionId::new(format!("attempt-{}", i)))
            .collect();
        let params = json!(null);

        let first_ambiance = make_ambiance("first", &node);
        let second_ambiance = make_ambiance("second", &node);
        let first_event = make_event(&first_ambiance, &node, status, &failure, &retry_ids, &params);
        let second_event = make_event(&second_ambiance, &node, status, &failure, &retry_ids, &params);

        let first = advise(&registries, first_event).unwrap();
        let again = advise(&registries, first_event).unwrap();
        let elsewhere = advise(&registries, second_event).unwrap();
        prop_assert_eq!(&first, &again);
        prop_assert_eq!(&first, &elsewhere);
    }

    #[test]
    fn unadvised_nodes_follow_status(status in arb_finished_status()) {
        let registries = make_registries();
        let node = PlanNode::new("plain", StepType::new("NOOP"));
        let ambiance = make_ambiance("run", &node);
        let failure = FailureInfo::application("boom");
        let params = json!(null);
        let response = advise(
            &registries,
            make_event(&ambiance, &node, status, &failure, &[], &params),
        )
        .unwrap();

        prop_assert_eq!(
            matches!(response, orchestration_types::AdviserResponse::NextStep { next_node_id: None }),
            status.is_positive()
        );
    }
}
