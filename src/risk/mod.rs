//! Risk service client.
//!
//! The risk service is a synchronous external collaborator: it receives a
//! workflow snapshot and returns a banded score. It never mutates workflow
//! state; the state machine consumes the returned value.

mod http;

pub use http::{HttpRiskClient, HttpRiskClientConfig};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::RiskConfig;
use crate::domain::{Jurisdiction, RiskBand, SignalMap, TenantId, WorkflowId};
use crate::infra::{Retry, RetryConfig};

/// Workflow snapshot sent to the risk service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub workflow_id: WorkflowId,
    pub tenant_id: TenantId,
    pub jurisdiction: Jurisdiction,
    pub signals: SignalMap,
}

/// Result returned by the risk service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub band: RiskBand,
    pub score: f64,
    #[serde(default)]
    pub confidence: f64,
    /// Ordered contributing-factor tokens; become decision reason codes.
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub detail: Value,
    #[serde(default)]
    pub policy_version: Option<String>,
}

/// Risk call failures, split by whether retrying can help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    /// Timeouts, connection failures, 5xx responses.
    #[error("transient risk failure: {0}")]
    Transient(String),
    /// 4xx responses and schema violations; surfaces immediately.
    #[error("permanent risk failure: {0}")]
    Permanent(String),
}

impl RiskError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RiskError::Transient(_))
    }
}

/// Risk evaluation interface; the HTTP client is the production
/// implementation, tests substitute stubs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RiskEvaluator: Send + Sync {
    async fn evaluate(&self, snapshot: &RiskSnapshot) -> Result<RiskResult, RiskError>;
}

/// Invoke the evaluator under the configured retry policy.
///
/// Only transient failures are retried, with exponential backoff and jitter;
/// total wall time is capped so the handler deadline keeps budget for
/// finalisation. The last error is returned once the budget is spent.
pub async fn evaluate_with_policy(
    evaluator: &dyn RiskEvaluator,
    snapshot: &RiskSnapshot,
    cfg: &RiskConfig,
) -> Result<RiskResult, RiskError> {
    let retry_cfg = RetryConfig {
        max_retries: cfg.risk_max_retries,
        initial_delay: cfg.risk_backoff_base,
        max_delay: cfg.risk_backoff_cap,
        multiplier: 2.0,
        jitter: 0.5,
        max_total_wait: Some(cfg.risk_timeout * (cfg.risk_max_retries + 1)),
    };

    let result = Retry::new(retry_cfg)
        .run_with_predicate(
            || evaluator.evaluate(snapshot),
            |e: &RiskError| e.is_transient(),
        )
        .await;

    if result.attempts > 1 {
        tracing::warn!(
            workflow_id = %snapshot.workflow_id,
            attempts = result.attempts,
            success = result.is_success(),
            "risk evaluation needed retries"
        );
    }

    result.into_result()
}
