//! Per-workflow serialisation.
//!
//! A keyed actor map guarantees at most one in-flight handler per
//! `workflow_id` while handlers for different workflows run in parallel up
//! to the worker cap. Each key owns a bounded FIFO queue; overflow surfaces
//! as backpressure to the ingress. Idle actors are released after a TTL and
//! recreated on the next event, bounding memory under many workflows.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::SerializerConfig;
use crate::domain::{EventEnvelope, WorkflowId};
use crate::infra::{OrchestratorError, Result, WorkflowStore};

const SHARD_COUNT: usize = 16;

/// Processes one event under the per-workflow lock.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;
}

struct QueuedEvent {
    event: EventEnvelope,
    attempts: u32,
}

type Shard = Mutex<HashMap<WorkflowId, mpsc::Sender<QueuedEvent>>>;

/// Keyed actor map indexed by `workflow_id`.
pub struct WorkflowSerializer {
    shards: Vec<Shard>,
    handler: Arc<dyn EventHandler>,
    store: Arc<dyn WorkflowStore>,
    limiter: Arc<Semaphore>,
    config: SerializerConfig,
}

impl WorkflowSerializer {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        store: Arc<dyn WorkflowStore>,
        config: SerializerConfig,
    ) -> Arc<Self> {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Arc::new(Self {
            shards,
            handler,
            store,
            limiter: Arc::new(Semaphore::new(config.worker_cap.max(1))),
            config,
        })
    }

    fn shard_index(&self, workflow_id: &WorkflowId) -> usize {
        let mut hasher = DefaultHasher::new();
        workflow_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn lock_shard(&self, index: usize) -> std::sync::MutexGuard<'_, HashMap<WorkflowId, mpsc::Sender<QueuedEvent>>> {
        self.shards[index]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue an event for its workflow's actor, spawning one if needed.
    ///
    /// Returns `Backpressure` when the per-workflow queue is full; the
    /// caller treats that as retriable.
    pub fn submit(self: &Arc<Self>, event: EventEnvelope) -> Result<()> {
        let workflow_id = event.workflow_id.clone();
        let shard_index = self.shard_index(&workflow_id);
        let mut item = QueuedEvent { event, attempts: 0 };

        loop {
            let tx = {
                let mut shard = self.lock_shard(shard_index);
                match shard.get(&workflow_id) {
                    Some(tx) => tx.clone(),
                    None => {
                        let (tx, rx) =
                            mpsc::channel(self.config.per_workflow_queue_depth.max(1));
                        shard.insert(workflow_id.clone(), tx.clone());
                        self.spawn_actor(workflow_id.clone(), shard_index, tx.clone(), rx);
                        tx
                    }
                }
            };

            match tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(_)) => {
                    return Err(OrchestratorError::Backpressure { workflow_id });
                }
                Err(TrySendError::Closed(rejected)) => {
                    // The actor retired between lookup and send; drop the
                    // stale entry and respawn.
                    let mut shard = self.lock_shard(shard_index);
                    if let Some(existing) = shard.get(&workflow_id) {
                        if existing.same_channel(&tx) {
                            shard.remove(&workflow_id);
                        }
                    }
                    item = rejected;
                }
            }
        }
    }

    /// Number of live actors; exposed for tests and the readiness probe.
    pub fn actor_count(&self) -> usize {
        (0..self.shards.len())
            .map(|i| self.lock_shard(i).len())
            .sum()
    }

    fn spawn_actor(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
        shard_index: usize,
        tx: mpsc::Sender<QueuedEvent>,
        mut rx: mpsc::Receiver<QueuedEvent>,
    ) {
        let serializer = Arc::clone(self);
        tokio::spawn(async move {
            debug!(workflow_id = %workflow_id, "workflow actor started");
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(item) => serializer.process(&workflow_id, item, &tx).await,
                        None => break,
                    },
                    _ = tokio::time::sleep(serializer.config.actor_idle_ttl) => {
                        let retired = {
                            let mut shard = serializer.lock_shard(shard_index);
                            if rx.is_empty() {
                                shard.remove(&workflow_id);
                                true
                            } else {
                                false
                            }
                        };
                        if retired {
                            // Senders holding a stale handle may have raced a
                            // send before close; drain what made it in.
                            rx.close();
                            while let Ok(item) = rx.try_recv() {
                                serializer.process(&workflow_id, item, &tx).await;
                            }
                            debug!(workflow_id = %workflow_id, "workflow actor retired");
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn process(
        &self,
        workflow_id: &WorkflowId,
        item: QueuedEvent,
        tx: &mpsc::Sender<QueuedEvent>,
    ) {
        let Ok(_permit) = self.limiter.acquire().await else {
            return;
        };

        let event_id = item.event.event_id.clone();
        let attempt = item.attempts + 1;

        let outcome = match tokio::time::timeout(
            self.config.event_handler_deadline,
            self.handler.handle(&item.event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::DeadlineExceeded {
                workflow_id: workflow_id.clone(),
            }),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.store.mark_event_processed(&event_id).await {
                    warn!(event_id = %event_id, error = %e, "failed to mark event processed");
                }
            }
            Err(e) if e.is_retriable() && attempt < self.config.max_delivery_attempts => {
                warn!(
                    workflow_id = %workflow_id,
                    event_id = %event_id,
                    attempt,
                    error = %e,
                    "handler failed; re-enqueueing event"
                );
                let requeued = QueuedEvent {
                    event: item.event,
                    attempts: attempt,
                };
                if tx.try_send(requeued).is_err() {
                    self.dead_letter(&event_id, "retry queue unavailable").await;
                }
            }
            Err(e) => {
                if let OrchestratorError::InvariantViolation { invariant, .. } = &e {
                    // Operator alert path: an invariant break means the
                    // pipeline can no longer trust this workflow's state.
                    error!(
                        workflow_id = %workflow_id,
                        event_id = %event_id,
                        invariant,
                        error = %e,
                        "invariant violation while handling event"
                    );
                } else {
                    warn!(
                        workflow_id = %workflow_id,
                        event_id = %event_id,
                        attempt,
                        error = %e,
                        "handler failed terminally; dead-lettering event"
                    );
                }
                self.dead_letter(&event_id, &e.to_string()).await;
            }
        }
    }

    async fn dead_letter(&self, event_id: &crate::domain::EventId, reason: &str) {
        if let Err(e) = self.store.mark_event_failed(event_id, reason).await {
            error!(event_id = %event_id, error = %e, "failed to dead-letter event");
        }
    }
}
