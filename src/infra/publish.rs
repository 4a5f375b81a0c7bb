//! Outbound publication of `decision.finalised` events.
//!
//! The authority publishes each newly appended decision exactly once per
//! process; delivery to consumers is at-least-once with `decision_id` as the
//! deduplication key.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::domain::DecisionRecord;

use super::{DecisionPublisher, OrchestratorError, Result};

/// Publishes decisions to the process's outbound event log (structured log
/// stream). A broker-backed publisher slots in behind the same trait.
pub struct LogPublisher;

#[async_trait]
impl DecisionPublisher for LogPublisher {
    async fn publish(&self, decision: &DecisionRecord) -> Result<()> {
        let payload = serde_json::to_string(decision)?;
        info!(
            target: "outbound.decision",
            decision_id = %decision.decision_id,
            workflow_id = %decision.workflow_id,
            outcome = %decision.outcome,
            is_override = decision.authority.is_override,
            event = %payload,
            "decision.finalised"
        );
        Ok(())
    }
}

/// Decouples publication from the handler via a buffered channel
/// (`outbound_publish_mode = async_with_buffer`).
///
/// `publish` returns once the decision is enqueued; a background task drains
/// the buffer into the wrapped publisher.
pub struct BufferedPublisher {
    tx: mpsc::Sender<DecisionRecord>,
}

impl BufferedPublisher {
    pub fn spawn(inner: Arc<dyn DecisionPublisher>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<DecisionRecord>(buffer.max(1));
        tokio::spawn(async move {
            while let Some(decision) = rx.recv().await {
                if let Err(e) = inner.publish(&decision).await {
                    error!(
                        decision_id = %decision.decision_id,
                        error = %e,
                        "buffered publish failed"
                    );
                }
            }
        });
        Self { tx }
    }
}

#[async_trait]
impl DecisionPublisher for BufferedPublisher {
    async fn publish(&self, decision: &DecisionRecord) -> Result<()> {
        self.tx
            .send(decision.clone())
            .await
            .map_err(|_| OrchestratorError::Internal("outbound buffer closed".to_string()))
    }
}

/// Captures published decisions in memory; test support.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<DecisionRecord>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<DecisionRecord> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl DecisionPublisher for MemoryPublisher {
    async fn publish(&self, decision: &DecisionRecord) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(decision.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Authority, CorrelationId, DecisionId, EventId, Jurisdiction, Lineage, Outcome, PolicyRef,
        RiskSummary, Subject, TenantId, WorkflowId,
    };
    use chrono::Utc;

    fn sample_decision() -> DecisionRecord {
        let wf = WorkflowId::new("wf1");
        let cause = EventId::new("e1");
        DecisionRecord {
            decision_id: DecisionId::derive(&wf, &cause, "auth"),
            workflow_id: wf,
            tenant_id: TenantId::new("cu-001"),
            cause_event_id: cause,
            outcome: Outcome::Approve,
            confidence: 0.95,
            reason_codes: vec!["velocity_ok".to_string()],
            risk_summary: RiskSummary::default(),
            policy: PolicyRef {
                jurisdiction: Jurisdiction::au(),
                pack_id: "au-core".to_string(),
                pack_version: "1.0.0".to_string(),
            },
            authority: Authority {
                decided_by: "decision-orchestrator".to_string(),
                service_version: "0.1.0".to_string(),
                is_override: false,
                actor_id: None,
            },
            lineage: Lineage::default(),
            subject: Subject {
                subject_type: "user".to_string(),
                subject_id: "wf1".to_string(),
                action: "onboarding".to_string(),
            },
            correlation_id: Some(CorrelationId::new("corr-1")),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_publisher_captures_in_order() {
        let publisher = MemoryPublisher::new();
        publisher.publish(&sample_decision()).await.unwrap();
        publisher.publish(&sample_decision()).await.unwrap();
        assert_eq!(publisher.count(), 2);
    }

    #[tokio::test]
    async fn buffered_publisher_drains_to_inner() {
        let inner = Arc::new(MemoryPublisher::new());
        let buffered = BufferedPublisher::spawn(inner.clone(), 8);

        buffered.publish(&sample_decision()).await.unwrap();

        // The background task drains asynchronously.
        for _ in 0..50 {
            if inner.count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(inner.count(), 1);
    }

    #[tokio::test]
    async fn log_publisher_accepts_any_record() {
        LogPublisher.publish(&sample_decision()).await.unwrap();
    }
}
