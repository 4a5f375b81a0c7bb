//! Infrastructure layer for the decision orchestrator.
//!
//! Contains trait definitions and implementations for:
//! - Workflow storage (SQLite, in-memory)
//! - Outbound decision publication (log, buffered, in-memory)
//! - Retry with exponential backoff and jitter
//! - The error taxonomy shared across the pipeline

mod error;
mod memory;
mod publish;
mod retry;
mod sqlite;
mod traits;

pub use error::{OrchestratorError, Result};
pub use memory::MemoryWorkflowStore;
pub use publish::{BufferedPublisher, LogPublisher, MemoryPublisher};
pub use retry::{Retry, RetryConfig, RetryResult};
pub use sqlite::SqliteWorkflowStore;
pub use traits::{
    AppendOutcome, DecisionPublisher, RecordOutcome, WorkflowFilter, WorkflowStore,
};
#[cfg(test)]
pub use traits::{MockDecisionPublisher, MockWorkflowStore};
