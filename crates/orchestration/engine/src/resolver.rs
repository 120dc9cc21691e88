//! Resolvers: turn a [`RefObject`] into a value, honoring scope
//!
//! An output is published into a scope, the runtime ids of a prefix of the
//! producer's level stack. It is visible to every node whose own level
//! stack starts with that prefix. Resolution prefers the longest visible
//! scope, so when two enclosing scopes both published a name, the nearer
//! one wins.

use crate::clock::EngineClock;
use crate::storage::{OutputStorage, Storage};
use async_trait::async_trait;
use orchestration_types::{
    Ambiance, NodeExecutionId, OrchestrationError, OrchestrationResult, OutputInstance,
    OutputInstanceId, PlanNodeId, RefObject, RefType, StorageError,
};
use serde_json::Value;
use std::sync::Arc;

/// Where a published output becomes visible
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputScope {
    /// The producer's enclosing scope: later siblings and their descendants
    Siblings,
    /// Only nodes nested beneath the producer
    Descendants,
    /// Everything beneath the nearest level tagged with this group
    Group(String),
}

impl OutputScope {
    pub fn from_group(group: Option<&str>) -> Self {
        match group {
            Some(group) => OutputScope::Group(group.to_string()),
            None => OutputScope::Siblings,
        }
    }

    /// Runtime ids forming this scope for a producer at `ambiance`
    pub fn runtime_ids(&self, ambiance: &Ambiance) -> OrchestrationResult<Vec<NodeExecutionId>> {
        let ids = ambiance.runtime_ids();
        match self {
            OutputScope::Siblings => Ok(ids[..ids.len().saturating_sub(1)].to_vec()),
            OutputScope::Descendants => Ok(ids),
            OutputScope::Group(group) => {
                let index = ambiance.level_index_for_group(group).ok_or_else(|| {
                    OrchestrationError::Resolution {
                        name: group.clone(),
                        reason: "no enclosing level carries this group".to_string(),
                    }
                })?;
                Ok(ids[..=index].to_vec())
            }
        }
    }
}

/// Looks up and publishes one kind of referenced output
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> OrchestrationResult<Option<Value>>;

    async fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> OrchestrationResult<Value> {
        self.resolve_optional(ambiance, ref_object)
            .await?
            .ok_or_else(|| OrchestrationError::Resolution {
                name: ref_object.name.clone(),
                reason: match &ref_object.producer_id {
                    Some(producer) => format!("nothing published by {}", producer),
                    None => "nothing published in an enclosing scope".to_string(),
                },
            })
    }

    /// Publish a value produced by the node at `ambiance`
    async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: OutputScope,
    ) -> OrchestrationResult<OutputInstanceId>;
}

/// Storage-backed resolver for outcomes or sweeping outputs
pub struct OutputResolver {
    ref_type: RefType,
    storage: Arc<dyn Storage>,
    clock: EngineClock,
}

impl OutputResolver {
    /// Resolver stamping published outputs with `clock`
    pub fn new(ref_type: RefType, storage: Arc<dyn Storage>, clock: EngineClock) -> Self {
        Self {
            ref_type,
            storage,
            clock,
        }
    }
}

/// Pick the instance a requester at `requester` should see
pub fn select_nearest<'a>(
    requester: &[NodeExecutionId],
    candidates: &'a [OutputInstance],
    producer: Option<&PlanNodeId>,
) -> Option<&'a OutputInstance> {
    let matching = candidates
        .iter()
        .filter(|c| producer.map_or(true, |p| &c.producer_setup_id == p));

    let visible = matching
        .clone()
        .filter(|c| requester.starts_with(&c.scope))
        .max_by_key(|c| (c.scope.len(), c.created_at));

    match (visible, producer) {
        (Some(found), _) => Some(found),
        // an explicitly named producer outside the requester's scope is still
        // addressable; the most recent instance wins
        (None, Some(_)) => matching.max_by_key(|c| c.created_at),
        (None, None) => None,
    }
}

fn extract_key(value: &Value, key: Option<&str>) -> Option<Value> {
    match key {
        None => Some(value.clone()),
        Some(key) => value.get(key).cloned(),
    }
}

#[async_trait]
impl Resolver for OutputResolver {
    async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> OrchestrationResult<Option<Value>> {
        let candidates = self
            .storage
            .list_outputs(&ambiance.plan_execution_id, &self.ref_type, &ref_object.name)
            .await?;
        let requester = ambiance.runtime_ids();
        Ok(
            select_nearest(&requester, &candidates, ref_object.producer_id.as_ref())
                .and_then(|found| extract_key(&found.value, ref_object.key.as_deref())),
        )
    }

    async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: Value,
        scope: OutputScope,
    ) -> OrchestrationResult<OutputInstanceId> {
        let level = ambiance
            .current_level()
            .ok_or_else(|| OrchestrationError::Resolution {
                name: name.to_string(),
                reason: "outputs can only be published by a running node".to_string(),
            })?;
        let group_name = match &scope {
            OutputScope::Group(group) => Some(group.clone()),
            _ => None,
        };
        let instance = OutputInstance {
            uuid: OutputInstanceId::generate(),
            plan_execution_id: ambiance.plan_execution_id.clone(),
            ref_type: self.ref_type.clone(),
            name: name.to_string(),
            producer_id: level.runtime_id.clone(),
            producer_setup_id: level.setup_id.clone(),
            group_name,
            scope: scope.runtime_ids(ambiance)?,
            value,
            created_at: self.clock.now(),
        };
        let id = instance.uuid.clone();
        self.storage.save_output(instance).await.map_err(|err| match err {
            StorageError::AlreadyExists(name) => OrchestrationError::DuplicateOutput { name },
            other => OrchestrationError::Storage(other),
        })?;
        tracing::debug!(
            ref_type = %self.ref_type,
            name,
            producer = %level.runtime_id,
            "Output published"
        );
        Ok(id)
    }
}
