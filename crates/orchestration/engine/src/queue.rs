//! Event queue and worker pool
//!
//! Workers pull [`EngineEvent`]s from a shared queue. No worker owns a node
//! execution across a suspension point: every continuation is a new event.

use async_trait::async_trait;
use orchestration_types::{
    CorrelationId, EngineEvent, OrchestrationError, OrchestrationResult, ResponseData,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Producer side of the event queue
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

/// Consumer side of the event queue, shared by all workers
#[derive(Clone, Debug)]
pub struct EventReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<EngineEvent>>>,
}

/// Create a connected sender/receiver pair
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender { tx },
        EventReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl EventSender {
    pub fn send(&self, event: EngineEvent) -> OrchestrationResult<()> {
        tracing::trace!(event = event.kind(), "Event queued");
        self.tx.send(event).map_err(|_| OrchestrationError::QueueClosed)
    }

    /// Queue `event` once `delay` has elapsed
    pub fn send_after(&self, event: EngineEvent, delay: Duration) -> OrchestrationResult<()> {
        if delay.is_zero() {
            return self.send(event);
        }
        if self.tx.is_closed() {
            return Err(OrchestrationError::QueueClosed);
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(event).is_err() {
                tracing::debug!("Delayed event discarded; queue closed");
            }
        });
        Ok(())
    }
}

impl EventReceiver {
    pub(crate) async fn recv(&self) -> Option<EngineEvent> {
        self.rx.lock().await.recv().await
    }
}

/// Delivers responses from delegates and async callbacks into the engine
#[derive(Clone, Debug)]
pub struct ResponseSink {
    events: EventSender,
}

impl ResponseSink {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    pub fn respond(&self, correlation_id: CorrelationId, payload: ResponseData) -> OrchestrationResult<()> {
        self.events.send(EngineEvent::Response {
            correlation_id,
            payload,
        })
    }
}

/// Something that processes engine events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: EngineEvent);
}

/// A fixed set of workers draining one queue
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one)
    pub fn spawn<H>(size: usize, receiver: EventReceiver, handler: Arc<H>) -> Self
    where
        H: EventHandler + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = (0..size.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker = index, "Worker started");
                    loop {
                        tokio::select! {
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                            event = receiver.recv() => match event {
                                Some(event) => handler.handle(event).await,
                                None => break,
                            },
                        }
                    }
                    tracing::debug!(worker = index, "Worker stopped");
                })
            })
            .collect();
        Self { workers, shutdown }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker to stop and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in futures::future::join_all(self.workers).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "Worker ended abnormally");
            }
        }
    }
}
