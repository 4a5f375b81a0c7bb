//! Error taxonomy for the decision orchestrator.
//!
//! Duplicate events and duplicate decisions are deliberately absent here:
//! they are success no-ops surfaced through [`crate::infra::RecordOutcome`]
//! and [`crate::infra::AppendOutcome`], never through this type.

use thiserror::Error;

use crate::domain::WorkflowId;

/// Errors raised across the ingestion and finalisation pipeline.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Envelope failed structural validation.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Event type is not in the accepted set.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Per-workflow queue is full; caller should retry later.
    #[error("backpressure for workflow {workflow_id}")]
    Backpressure { workflow_id: WorkflowId },

    /// Optimistic-concurrency write lost the race.
    #[error("stale version for workflow {workflow_id}: expected {expected}")]
    StaleVersion {
        workflow_id: WorkflowId,
        expected: u64,
    },

    /// Workflow missing where one must exist.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// Override targeting a workflow without a finalised decision.
    #[error("invalid override target: workflow {workflow_id} has no current decision")]
    InvalidOverrideTarget { workflow_id: WorkflowId },

    /// Risk service failed in a way worth retrying.
    #[error("risk service transiently unavailable: {0}")]
    RiskTransient(String),

    /// Risk service rejected the request; retrying cannot help.
    #[error("risk service permanently unavailable: {0}")]
    RiskPermanent(String),

    /// Durable store unreachable or failing.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// Handler exceeded its processing deadline.
    #[error("handler deadline exceeded for workflow {workflow_id}")]
    DeadlineExceeded { workflow_id: WorkflowId },

    /// A structural guarantee was broken; fatal for the handler.
    #[error("invariant violation: {invariant} - {message}")]
    InvariantViolation {
        invariant: &'static str,
        message: String,
    },

    /// Configuration error at bootstrap.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Whether the failed operation may succeed on retry.
    ///
    /// Drives both the serializer's re-enqueue decision and the ingress
    /// response mapping (retriable vs. terminal).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Backpressure { .. }
                | OrchestratorError::StaleVersion { .. }
                | OrchestratorError::RiskTransient(_)
                | OrchestratorError::StoreUnavailable(_)
                | OrchestratorError::DeadlineExceeded { .. }
        )
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Internal(format!("serialization: {e}"))
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
