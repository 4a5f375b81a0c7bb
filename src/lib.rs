//! Decision Orchestrator Library
//!
//! Regulated-decision orchestrator: ingests signal events about
//! identity/transaction workflows, advances each workflow through a state
//! machine, invokes risk evaluation, and emits exactly one authoritative
//! `decision.finalised` event per resolve.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (events, workflows, decisions)
//! - [`infra`] - Store implementations, publishers, retry, errors
//! - [`engine`] - State machine, serializer, handler, decision authority
//! - [`risk`] - Risk service client
//! - [`policy`] - Jurisdiction policy packs
//! - [`dispatch`] - Ingress dispatcher
//! - [`api`] - REST routes
//! - [`server`] - Bootstrap and wiring

pub mod api;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod infra;
pub mod migrations;
pub mod policy;
pub mod risk;
pub mod server;

// Re-export commonly used types
pub use domain::{
    DecisionId, DecisionRecord, EventEnvelope, EventId, EventKind, EventSubmission, Outcome,
    RiskBand, TenantId, WorkflowId, WorkflowState,
};

pub use infra::{
    AppendOutcome, MemoryWorkflowStore, OrchestratorError, RecordOutcome, Result,
    SqliteWorkflowStore, WorkflowFilter, WorkflowStore,
};
