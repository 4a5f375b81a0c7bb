//! Domain types for the decision orchestrator.
//!
//! - [`types`] - identifiers and closed enumerations
//! - [`event`] - event envelope, typed payloads, ingress validation
//! - [`workflow`] - per-subject workflow projection and signal map
//! - [`decision`] - append-only decision records and lineage

mod decision;
mod event;
mod types;
mod workflow;

pub use decision::{
    Authority, DecisionId, DecisionRecord, Lineage, PolicyRef, RiskSummary, Subject,
};
pub use event::{EventEnvelope, EventKind, EventPayload, EventSubmission};
pub use types::{
    hash256_hex, ActorId, CorrelationId, EventId, Hash256, Jurisdiction, Outcome, RiskBand,
    TenantId, WorkflowId, WorkflowState,
};
pub use workflow::{
    signal_updates_for, signals, SignalMap, WorkflowMutation, WorkflowRecord,
};
