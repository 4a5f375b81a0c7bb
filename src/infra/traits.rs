//! Trait definitions for the orchestrator's durable store and outbound
//! publication.
//!
//! Invariant: the decision log is written only through
//! [`WorkflowStore::append_decision`], and the only caller of that operation
//! is the decision authority.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    DecisionRecord, EventEnvelope, EventId, TenantId, WorkflowId, WorkflowMutation,
    WorkflowRecord, WorkflowState,
};

use super::Result;

/// Outcome of recording an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sighting of this `event_id`.
    New,
    /// Seen before; `processed` tells whether its handler ran to completion,
    /// so an event stranded by backpressure can be re-enqueued on retry.
    Duplicate { processed: bool },
}

/// Outcome of appending a decision.
///
/// A duplicate `decision_id` is a success no-op: exactly one caller observes
/// `Appended`, every other caller gets the already-stored record back. This
/// uniqueness is the foundation of the single-emitter invariant.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(DecisionRecord),
    Duplicate(DecisionRecord),
}

impl AppendOutcome {
    pub fn record(&self) -> &DecisionRecord {
        match self {
            AppendOutcome::Appended(r) | AppendOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, AppendOutcome::Appended(_))
    }
}

/// Investigator listing filter.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub tenant_id: Option<TenantId>,
    pub state: Option<WorkflowState>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Durable per-workflow state plus the append-only decision log.
///
/// All operations are durable before returning. Concurrency control is
/// optimistic: writes carry the expected workflow version and fail with
/// `StaleVersion` when it no longer matches.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Record an inbound event for idempotency; duplicates are detected by
    /// `event_id`. Events are never mutated or deleted.
    async fn record_event(&self, event: &EventEnvelope) -> Result<RecordOutcome>;

    /// Mark an event's handler as having run to completion.
    async fn mark_event_processed(&self, event_id: &EventId) -> Result<()>;

    /// Dead-letter an event after its retry budget is spent.
    async fn mark_event_failed(&self, event_id: &EventId, reason: &str) -> Result<()>;

    /// Load the workflow and its full decision history in append order.
    async fn load(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<(WorkflowRecord, Vec<DecisionRecord>)>>;

    /// Atomically create the workflow if absent; returns the stored record
    /// either way.
    async fn create_if_absent(
        &self,
        workflow_id: &WorkflowId,
        tenant_id: &TenantId,
    ) -> Result<WorkflowRecord>;

    /// Optimistic-concurrency state write; bumps version by exactly 1.
    async fn apply(
        &self,
        workflow_id: &WorkflowId,
        expected_version: u64,
        mutation: WorkflowMutation,
    ) -> Result<WorkflowRecord>;

    /// Atomically append a decision, point `current_decision_id` at it, set
    /// the workflow state to `finalised`, and bump the version.
    ///
    /// A duplicate `decision_id` leaves workflow and log untouched and
    /// returns the existing record.
    async fn append_decision(
        &self,
        workflow_id: &WorkflowId,
        expected_version: u64,
        decision: DecisionRecord,
    ) -> Result<AppendOutcome>;

    /// Investigator listing; pure read, most recent first.
    async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<WorkflowRecord>>;
}

/// Outbound sink for `decision.finalised` events.
///
/// Publication is at-least-once; `decision_id` is the consumer-side
/// deduplication key.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DecisionPublisher: Send + Sync {
    async fn publish(&self, decision: &DecisionRecord) -> Result<()>;
}
