//! Workflow projection: per-subject mutable state keyed by workflow id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{DecisionId, EventPayload, TenantId, WorkflowId, WorkflowState};

/// Well-known signal names recorded from inbound events.
pub mod signals {
    pub const LIVENESS_SCORE: &str = "liveness_score";
    pub const LIVENESS_CONFIDENCE: &str = "liveness_confidence";
    pub const FACE_CENTERED: &str = "face_centered";
    pub const FACE_SIZE: &str = "face_size";
    pub const DOCUMENT_TYPE: &str = "document_type";
    pub const DOCUMENT_QUALITY: &str = "document_quality";
    pub const MATCH_SCORE: &str = "match_score";
    pub const MATCH_MODEL_IDS: &str = "match_model_ids";
    /// Optional hints used to populate the outbound subject block.
    pub const SUBJECT_ID: &str = "subject_id";
    pub const SUBJECT_ACTION: &str = "subject_action";
}

/// Accumulated facts about a workflow, name -> last-observed value.
///
/// Backed by a BTreeMap so serialized form (and thus replayed decision
/// records) has a stable key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalMap(pub BTreeMap<String, Value>);

impl SignalMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Last-write-wins update.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn merge(&mut self, updates: &[(String, Value)]) {
        for (name, value) in updates {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn as_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn as_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Signal updates derived from a typed event payload.
pub fn signal_updates_for(payload: &EventPayload) -> Vec<(String, Value)> {
    match payload {
        EventPayload::SelfieUploaded {
            liveness_score,
            confidence,
            face_centered,
            face_size,
        } => vec![
            (signals::LIVENESS_SCORE.to_string(), json_f64(*liveness_score)),
            (
                signals::LIVENESS_CONFIDENCE.to_string(),
                json_f64(*confidence),
            ),
            (signals::FACE_CENTERED.to_string(), Value::Bool(*face_centered)),
            (signals::FACE_SIZE.to_string(), json_f64(*face_size)),
        ],
        EventPayload::DocumentUploaded {
            document_type,
            quality_score,
        } => vec![
            (
                signals::DOCUMENT_TYPE.to_string(),
                Value::String(document_type.clone()),
            ),
            (signals::DOCUMENT_QUALITY.to_string(), json_f64(*quality_score)),
        ],
        EventPayload::MatchCompleted {
            match_score,
            model_ids,
        } => vec![
            (signals::MATCH_SCORE.to_string(), json_f64(*match_score)),
            (
                signals::MATCH_MODEL_IDS.to_string(),
                Value::Array(model_ids.iter().cloned().map(Value::String).collect()),
            ),
        ],
        // Overrides carry no signals; they act on the decision log.
        EventPayload::OverrideApplied { .. } => Vec::new(),
    }
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Mutable workflow projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: WorkflowId,
    pub tenant_id: TenantId,
    pub state: WorkflowState,
    pub signals: SignalMap,
    /// The currently authoritative decision, if any.
    pub current_decision_id: Option<DecisionId>,
    /// Bumped by exactly 1 on every successful store write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(workflow_id: WorkflowId, tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            tenant_id,
            state: WorkflowState::Pending,
            signals: SignalMap::new(),
            current_decision_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Mutation applied atomically by `WorkflowStore::apply`.
#[derive(Debug, Clone, Default)]
pub struct WorkflowMutation {
    pub state: Option<WorkflowState>,
    pub signal_updates: Vec<(String, Value)>,
}

impl WorkflowMutation {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.signal_updates.is_empty()
    }
}
