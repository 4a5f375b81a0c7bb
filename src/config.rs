//! Engine configuration.
//!
//! Defaults suit a single-node deployment; the server bootstrap overrides
//! them from environment variables.

use std::time::Duration;

/// Behaviour when risk retries are exhausted on transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientFallback {
    /// Finalise with `outcome=review` and a reason code naming the failure.
    Review,
    /// Keep the event queued for a later retry instead of finalising.
    Retain,
}

/// Per-workflow serialisation and handler scheduling.
#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// Max concurrent event handlers across all workflows.
    pub worker_cap: usize,
    /// Bounded queue depth per workflow; overflow is backpressure.
    pub per_workflow_queue_depth: usize,
    /// How long an idle per-workflow actor lingers before release.
    pub actor_idle_ttl: Duration,
    /// Deadline for a single event handler run.
    pub event_handler_deadline: Duration,
    /// Delivery attempts per event before dead-lettering.
    pub max_delivery_attempts: u32,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            worker_cap: 64,
            per_workflow_queue_depth: 32,
            actor_idle_ttl: Duration::from_secs(30),
            event_handler_deadline: Duration::from_secs(30),
            max_delivery_attempts: 3,
        }
    }
}

/// Risk service invocation policy.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Per-call timeout; stricter than the handler deadline so finalisation
    /// keeps budget after the last attempt.
    pub risk_timeout: Duration,
    pub risk_max_retries: u32,
    pub risk_backoff_base: Duration,
    pub risk_backoff_cap: Duration,
    pub transient_fallback: TransientFallback,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_timeout: Duration::from_secs(5),
            risk_max_retries: 3,
            risk_backoff_base: Duration::from_millis(200),
            risk_backoff_cap: Duration::from_secs(5),
            transient_fallback: TransientFallback::Review,
        }
    }
}

/// Outbound publication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Publish inline before the handler completes.
    Sync,
    /// Hand off to a buffered background task.
    AsyncWithBuffer { buffer: usize },
}

impl Default for PublishMode {
    fn default() -> Self {
        PublishMode::Sync
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub serializer: SerializerConfig,
    pub risk: RiskConfig,
    pub publish_mode: PublishMode,
}
