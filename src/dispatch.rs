//! Ingress dispatcher.
//!
//! Accepts wire submissions, validates them, records them for idempotency,
//! ensures the workflow exists, and hands the event to the per-workflow
//! serializer. The response acknowledges enqueueing, not processing; callers
//! needing the outcome read the query API or the outbound log.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::domain::{EventEnvelope, EventId, EventSubmission};
use crate::engine::WorkflowSerializer;
use crate::infra::{RecordOutcome, Result, WorkflowStore};

/// Acknowledgement statuses for accepted submissions. Invalid and
/// backpressured submissions surface as errors and are mapped by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressStatus {
    Accepted,
    Duplicate,
}

/// Receipt returned for an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct IngressReceipt {
    pub status: IngressStatus,
    pub event_id: EventId,
}

/// Front door for event submissions.
pub struct IngressDispatcher {
    store: Arc<dyn WorkflowStore>,
    serializer: Arc<WorkflowSerializer>,
}

impl IngressDispatcher {
    pub fn new(store: Arc<dyn WorkflowStore>, serializer: Arc<WorkflowSerializer>) -> Self {
        Self { store, serializer }
    }

    /// Validate, record, and enqueue a submission.
    ///
    /// Errors: `MalformedEvent`/`UnknownEventType` for invalid envelopes,
    /// `Backpressure` when the workflow queue is full (retriable), store
    /// errors when durability cannot be guaranteed.
    #[instrument(skip_all)]
    pub async fn submit(&self, submission: EventSubmission) -> Result<IngressReceipt> {
        let envelope = EventEnvelope::validate(submission)?;
        let event_id = envelope.event_id.clone();

        match self.store.record_event(&envelope).await? {
            RecordOutcome::New => {
                self.store
                    .create_if_absent(&envelope.workflow_id, &envelope.tenant_id)
                    .await?;
                self.serializer.submit(envelope)?;
                Ok(IngressReceipt {
                    status: IngressStatus::Accepted,
                    event_id,
                })
            }
            RecordOutcome::Duplicate { processed } => {
                if !processed {
                    // Recorded but never completed, e.g. stranded by an
                    // earlier backpressure response or a crash. Re-enqueue;
                    // handlers and decision ids are idempotent, so a benign
                    // double delivery cannot produce a second decision.
                    debug!(event_id = %event_id, "re-enqueueing unprocessed duplicate");
                    self.store
                        .create_if_absent(&envelope.workflow_id, &envelope.tenant_id)
                        .await?;
                    self.serializer.submit(envelope)?;
                }
                Ok(IngressReceipt {
                    status: IngressStatus::Duplicate,
                    event_id,
                })
            }
        }
    }
}
