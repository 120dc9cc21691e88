//! Correlation records: which node execution waits on which responses

use crate::{CorrelationId, NodeExecutionId, PlanExecutionId, ResponseData, ResponseDataMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A node execution suspended until every expected id is answered
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationWait {
    pub node_execution_id: NodeExecutionId,
    pub plan_execution_id: PlanExecutionId,
    pub expected: BTreeSet<CorrelationId>,
    pub received: ResponseDataMap,
    /// Report every answer but the last one individually
    pub progress: bool,
}

impl CorrelationWait {
    pub fn new(
        node_execution_id: NodeExecutionId,
        plan_execution_id: PlanExecutionId,
        progress: bool,
    ) -> Self {
        Self {
            node_execution_id,
            plan_execution_id,
            expected: BTreeSet::new(),
            received: ResponseDataMap::new(),
            progress,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|id| self.received.contains_key(id))
    }

    /// Expected ids not answered yet
    pub fn outstanding(&self) -> Vec<CorrelationId> {
        self.expected
            .iter()
            .filter(|id| !self.received.contains_key(*id))
            .cloned()
            .collect()
    }
}

/// A response that arrived before any wait named its id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EarlyResponse {
    pub correlation_id: CorrelationId,
    pub data: ResponseData,
    pub received_at: DateTime<Utc>,
}
