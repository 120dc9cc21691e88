//! Registries: type key → ready implementation
//!
//! Registration happens once while the engine is being built. A duplicate
//! key is a build or configuration error and is returned as such; lookups
//! of an unknown key fail the same way. After the engine starts, the
//! registries are shared read-only behind an `Arc`.

use crate::adviser::{
    AbortAdviser, Adviser, IgnoreAdviser, ManualInterventionAdviser, MarkSuccessAdviser,
    OnFailAdviser, OnSuccessAdviser, RetryAdviser, RollbackAdviser,
};
use crate::clock::EngineClock;
use crate::config::EngineConfig;
use crate::facilitator::{Facilitator, ModeFacilitator};
use crate::resolver::{OutputResolver, Resolver};
use crate::step::Step;
use crate::steps::{DelegateStep, ForkStep, NoopStep, SectionChainStep, SectionStep};
use crate::storage::Storage;
use crate::timeout::{AbsoluteTrackerFactory, ActiveTrackerFactory, TimeoutTrackerFactory};
use orchestration_types::{
    AdviserType, Dimension, ExecutionMode, FacilitatorType, OrchestrationError,
    OrchestrationResult, RefType, StepType,
};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

/// A register-once, lookup-by-key store
pub struct Registry<K, V> {
    kind: &'static str,
    entries: HashMap<K, V>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Display + Clone,
{
    /// Create an empty registry; `kind` names it in errors and logs
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: K, value: V) -> OrchestrationResult<()> {
        if self.entries.contains_key(&key) {
            return Err(OrchestrationError::DuplicateRegistration {
                registry: self.kind,
                key: key.to_string(),
            });
        }
        tracing::debug!(registry = self.kind, key = %key, "Registered");
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn obtain(&self, key: &K) -> OrchestrationResult<&V> {
        self.entries
            .get(key)
            .ok_or_else(|| OrchestrationError::UnregisteredKey {
                registry: self.kind,
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One registry per registrable kind
pub struct Registries {
    pub steps: Registry<StepType, Arc<dyn Step>>,
    pub facilitators: Registry<FacilitatorType, Arc<dyn Facilitator>>,
    pub advisers: Registry<AdviserType, Arc<dyn Adviser>>,
    pub resolvers: Registry<RefType, Arc<dyn Resolver>>,
    pub timeouts: Registry<Dimension, Arc<dyn TimeoutTrackerFactory>>,
}

impl Registries {
    /// Registries with nothing registered
    pub fn empty() -> Self {
        Self {
            steps: Registry::new("step"),
            facilitators: Registry::new("facilitator"),
            advisers: Registry::new("adviser"),
            resolvers: Registry::new("resolver"),
            timeouts: Registry::new("timeout"),
        }
    }

    /// Registries holding every built-in implementation
    pub fn with_defaults(storage: Arc<dyn Storage>, config: &EngineConfig) -> OrchestrationResult<Self> {
        Self::with_clock(storage, config, EngineClock::new())
    }

    /// Built-in registries whose resolvers timestamp outputs with `clock`
    pub fn with_clock(
        storage: Arc<dyn Storage>,
        config: &EngineConfig,
        clock: EngineClock,
    ) -> OrchestrationResult<Self> {
        let mut registries = Self::empty();

        let modes = [
            (FacilitatorType::SYNC, ExecutionMode::Sync),
            (FacilitatorType::ASYNC, ExecutionMode::Async),
            (FacilitatorType::TASK, ExecutionMode::Task),
            (FacilitatorType::TASK_CHAIN, ExecutionMode::TaskChain),
            (FacilitatorType::CHILD, ExecutionMode::Child),
            (FacilitatorType::CHILDREN, ExecutionMode::Children),
            (FacilitatorType::CHILD_CHAIN, ExecutionMode::ChildChain),
        ];
        for (key, mode) in modes {
            registries
                .facilitators
                .register(key, Arc::new(ModeFacilitator::new(mode)))?;
        }

        let advisers = &mut registries.advisers;
        advisers.register(AdviserType::ON_SUCCESS, Arc::new(OnSuccessAdviser))?;
        advisers.register(AdviserType::ON_FAIL, Arc::new(OnFailAdviser))?;
        advisers.register(
            AdviserType::RETRY,
            Arc::new(RetryAdviser::new(
                config.default_retry_wait(),
                config.intervention_timeout(),
            )),
        )?;
        advisers.register(AdviserType::IGNORE, Arc::new(IgnoreAdviser))?;
        advisers.register(
            AdviserType::MANUAL_INTERVENTION,
            Arc::new(ManualInterventionAdviser::new(config.intervention_timeout())),
        )?;
        advisers.register(AdviserType::MARK_SUCCESS, Arc::new(MarkSuccessAdviser))?;
        advisers.register(AdviserType::ABORT, Arc::new(AbortAdviser))?;
        advisers.register(AdviserType::ROLLBACK, Arc::new(RollbackAdviser))?;

        for ref_type in [RefType::OUTCOME, RefType::SWEEPING_OUTPUT] {
            registries.resolvers.register(
                ref_type.clone(),
                Arc::new(OutputResolver::new(ref_type, storage.clone(), clock.clone())),
            )?;
        }

        registries
            .timeouts
            .register(Dimension::ABSOLUTE, Arc::new(AbsoluteTrackerFactory))?;
        registries
            .timeouts
            .register(Dimension::ACTIVE, Arc::new(ActiveTrackerFactory))?;

        let steps = &mut registries.steps;
        steps.register(NoopStep::step_type(), Arc::new(NoopStep))?;
        steps.register(SectionStep::step_type(), Arc::new(SectionStep))?;
        steps.register(ForkStep::step_type(), Arc::new(ForkStep))?;
        steps.register(SectionChainStep::step_type(), Arc::new(SectionChainStep))?;
        steps.register(DelegateStep::step_type(), Arc::new(DelegateStep))?;

        Ok(registries)
    }
}
