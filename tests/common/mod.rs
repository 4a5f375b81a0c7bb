//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use decision_orchestrator::config::{OrchestratorConfig, RiskConfig, TransientFallback};
use decision_orchestrator::domain::{EventSubmission, RiskBand};
use decision_orchestrator::infra::{MemoryPublisher, WorkflowStore};
use decision_orchestrator::policy::PolicyRegistry;
use decision_orchestrator::risk::{RiskError, RiskEvaluator, RiskResult, RiskSnapshot};
use decision_orchestrator::server::{build_pipeline, AppState};
use decision_orchestrator::{WorkflowId, WorkflowState};

/// Fixed timestamps so replayed runs produce byte-identical decisions.
pub fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

pub fn submission(
    event_id: &str,
    event_type: &str,
    workflow_id: &str,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
) -> EventSubmission {
    EventSubmission {
        event_id: Some(event_id.to_string()),
        event_type: event_type.to_string(),
        workflow_id: workflow_id.to_string(),
        tenant_id: "cu-001".to_string(),
        correlation_id: Some(format!("corr-{event_id}")),
        timestamp,
        payload,
    }
}

pub fn selfie_payload(liveness: f64) -> serde_json::Value {
    json!({
        "liveness_score": liveness,
        "confidence": 0.9,
        "face_centered": true,
        "face_size": 0.4,
    })
}

pub fn document_payload(quality: f64) -> serde_json::Value {
    json!({
        "document_type": "passport",
        "quality_score": quality,
    })
}

pub fn match_payload(score: f64) -> serde_json::Value {
    json!({
        "match_score": score,
        "model_ids": ["mobilefacenet_v3", "arcface_r100"],
    })
}

pub fn override_payload(outcome: &str, reason: &str, actor: &str) -> serde_json::Value {
    json!({
        "new_outcome": outcome,
        "reason": reason,
        "authorized_by": actor,
    })
}

pub fn low_risk_result() -> RiskResult {
    RiskResult {
        band: RiskBand::Low,
        score: 15.0,
        confidence: 0.92,
        factors: vec!["velocity_ok".to_string()],
        detail: serde_json::Value::Null,
        policy_version: Some("1.0.0".to_string()),
    }
}

/// Programmable risk evaluator: pops scripted responses, then repeats the
/// default response.
pub struct StubRisk {
    scripted: Mutex<VecDeque<Result<RiskResult, RiskError>>>,
    default: Result<RiskResult, RiskError>,
    pub calls: AtomicU32,
}

impl StubRisk {
    pub fn always(default: Result<RiskResult, RiskError>) -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicU32::new(0),
        })
    }

    pub fn low_risk() -> Arc<Self> {
        Self::always(Ok(low_risk_result()))
    }

    pub fn always_transient() -> Arc<Self> {
        Self::always(Err(RiskError::Transient("connect refused".to_string())))
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskEvaluator for StubRisk {
    async fn evaluate(&self, _snapshot: &RiskSnapshot) -> Result<RiskResult, RiskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.default.clone())
    }
}

/// Engine config tuned for fast tests.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.serializer.event_handler_deadline = Duration::from_secs(5);
    config.serializer.actor_idle_ttl = Duration::from_secs(5);
    config.risk = RiskConfig {
        risk_timeout: Duration::from_millis(500),
        risk_max_retries: 2,
        risk_backoff_base: Duration::from_millis(1),
        risk_backoff_cap: Duration::from_millis(10),
        transient_fallback: TransientFallback::Review,
    };
    config
}

/// Full production wiring over the given store and risk stub, capturing
/// outbound decisions in a [`MemoryPublisher`].
pub fn pipeline(
    store: Arc<dyn WorkflowStore>,
    risk: Arc<dyn RiskEvaluator>,
    config: &OrchestratorConfig,
) -> (AppState, Arc<MemoryPublisher>) {
    let publisher = Arc::new(MemoryPublisher::new());
    let state = build_pipeline(
        store,
        risk,
        publisher.clone(),
        Arc::new(PolicyRegistry::with_defaults()),
        config,
    );
    (state, publisher)
}

/// Poll until the workflow holds `expected` decisions, or panic.
pub async fn wait_for_decisions(
    store: &dyn WorkflowStore,
    workflow_id: &WorkflowId,
    expected: usize,
) {
    for _ in 0..400 {
        if let Some((_, decisions)) = store.load(workflow_id).await.unwrap() {
            if decisions.len() >= expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow {workflow_id} never reached {expected} decisions");
}

/// Poll until the workflow reaches `state`, or panic.
pub async fn wait_for_state(
    store: &dyn WorkflowStore,
    workflow_id: &WorkflowId,
    state: WorkflowState,
) {
    for _ in 0..400 {
        if let Some((wf, _)) = store.load(workflow_id).await.unwrap() {
            if wf.state == state {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow {workflow_id} never reached state {state}");
}
