//! Timeout engine: schedules trackers and raises expiry events

use super::{TimeoutEvent, TimeoutTracker};
use crate::queue::EventSender;
use dashmap::DashMap;
use orchestration_types::{EngineEvent, NodeExecutionId, TimeoutInstanceId};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct TimeoutInstance {
    node_execution_id: NodeExecutionId,
    tracker: Arc<Mutex<Box<dyn TimeoutTracker>>>,
    changed: Arc<Notify>,
    watcher: Option<JoinHandle<()>>,
}

/// Scheduler for registered timeout trackers
///
/// Each registered tracker gets a watcher task that sleeps until the
/// tracker's expiry instant. The watcher that removes an instance from the
/// table is the only one that may fire it, so cancellation and expiry never
/// both take effect.
pub struct TimeoutEngine {
    instances: Arc<DashMap<TimeoutInstanceId, TimeoutInstance>>,
    events: EventSender,
}

impl TimeoutEngine {
    pub fn new(events: EventSender) -> Self {
        Self {
            instances: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Start tracking a timeout for a node execution
    pub fn register(
        &self,
        node_execution_id: &NodeExecutionId,
        tracker: Box<dyn TimeoutTracker>,
    ) -> TimeoutInstanceId {
        let id = TimeoutInstanceId::generate();
        let dimension = tracker.dimension();
        let tracker = Arc::new(Mutex::new(tracker));
        let changed = Arc::new(Notify::new());

        self.instances.insert(
            id.clone(),
            TimeoutInstance {
                node_execution_id: node_execution_id.clone(),
                tracker: tracker.clone(),
                changed: changed.clone(),
                watcher: None,
            },
        );

        let watcher = tokio::spawn(watch(
            id.clone(),
            node_execution_id.clone(),
            tracker,
            changed,
            self.instances.clone(),
            self.events.clone(),
        ));
        if let Some(mut instance) = self.instances.get_mut(&id) {
            instance.watcher = Some(watcher);
        }

        tracing::debug!(
            node_execution_id = %node_execution_id,
            timeout_instance_id = %id,
            dimension = %dimension,
            "Timeout registered"
        );
        id
    }

    /// Stop tracking; returns whether the instance was still live
    pub fn cancel(&self, id: &TimeoutInstanceId) -> bool {
        match self.instances.remove(id) {
            Some((_, instance)) => {
                if let Some(watcher) = instance.watcher {
                    watcher.abort();
                }
                tracing::trace!(timeout_instance_id = %id, "Timeout cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self, ids: &[TimeoutInstanceId]) {
        for id in ids {
            self.cancel(id);
        }
    }

    /// Forward a lifecycle event to the trackers of `ids`
    pub async fn on_event(&self, ids: &[TimeoutInstanceId], event: TimeoutEvent, at: Instant) {
        for id in ids {
            let handles = self
                .instances
                .get(id)
                .map(|i| (i.tracker.clone(), i.changed.clone()));
            if let Some((tracker, changed)) = handles {
                tracker.lock().await.on_event(event, at);
                changed.notify_one();
            }
        }
    }

    /// Number of live timeout instances
    pub fn active_count(&self) -> usize {
        self.instances.len()
    }

    /// Node execution owning a live timeout instance
    pub fn owner(&self, id: &TimeoutInstanceId) -> Option<NodeExecutionId> {
        self.instances.get(id).map(|i| i.node_execution_id.clone())
    }
}

async fn watch(
    id: TimeoutInstanceId,
    node_execution_id: NodeExecutionId,
    tracker: Arc<Mutex<Box<dyn TimeoutTracker>>>,
    changed: Arc<Notify>,
    instances: Arc<DashMap<TimeoutInstanceId, TimeoutInstance>>,
    events: EventSender,
) {
    loop {
        let expiry = tracker.lock().await.expiry_instant();
        match expiry {
            Some(at) if at <= Instant::now() => break,
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = changed.notified() => {}
                }
            }
            None => changed.notified().await,
        }
    }

    if instances.remove(&id).is_none() {
        return;
    }
    tracing::info!(
        node_execution_id = %node_execution_id,
        timeout_instance_id = %id,
        "Timeout expired"
    );
    let event = EngineEvent::TimeoutExpired {
        node_execution_id,
        timeout_instance_id: id,
    };
    if events.send(event).is_err() {
        tracing::debug!("Timeout expiry discarded; queue closed");
    }
}
