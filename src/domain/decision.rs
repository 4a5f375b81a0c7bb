//! Decision records: the append-only, authoritative output of the pipeline.
//!
//! A [`DecisionRecord`] is constructed only by the decision authority and is
//! never mutated after it is appended to a workflow's decision log. The
//! serialized record is also the outbound `decision.finalised` event, so a
//! record must be fully derivable from its inputs: no wall-clock reads, no
//! random identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use super::{
    hash256_hex, ActorId, CorrelationId, EventId, Hash256, Jurisdiction, Outcome, RiskBand,
    TenantId, WorkflowId,
};

/// Domain prefix for decision id derivation.
const DOMAIN_DECISION_ID: &[u8] = b"DECISION_ID_V1";

/// Deterministic decision identifier.
///
/// Derived as `SHA-256(domain || workflow_id || cause_event_id || authority)`
/// with length-prefixed fields, so re-delivery of the same causing event
/// yields the same id and the store's uniqueness check collapses retries
/// into a single appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(#[serde(with = "hash256_hex")] pub Hash256);

impl DecisionId {
    pub fn derive(workflow_id: &WorkflowId, cause_event_id: &EventId, authority: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_DECISION_ID);
        for field in [workflow_id.as_str(), cause_event_id.as_str(), authority] {
            hasher.update((field.len() as u32).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: Hash256 = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Jurisdictional policy pack reference captured at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRef {
    pub jurisdiction: Jurisdiction,
    pub pack_id: String,
    pub pack_version: String,
}

/// Who finalised the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub decided_by: String,
    pub service_version: String,
    pub is_override: bool,
    /// Human actor, present exactly when `is_override` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ActorId>,
}

/// Override lineage. The chain of `supersedes_decision_id` links connects
/// each override to the decision it replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes_decision_id: Option<DecisionId>,
}

/// Opaque risk evaluation summary captured at decision time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band: Option<RiskBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factors: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

/// Subject block on the outbound event, derived from workflow signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
}

/// Append-only decision record; doubles as the outbound `decision.finalised`
/// event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: DecisionId,
    pub workflow_id: WorkflowId,
    pub tenant_id: TenantId,
    /// The input event this decision answers; at most one decision per cause.
    pub cause_event_id: EventId,
    pub outcome: Outcome,
    pub confidence: f64,
    pub reason_codes: Vec<String>,
    pub risk_summary: RiskSummary,
    pub policy: PolicyRef,
    pub authority: Authority,
    pub lineage: Lineage,
    pub subject: Subject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Taken from the causing event so replays reproduce identical records.
    pub timestamp: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn is_override(&self) -> bool {
        self.authority.is_override
    }
}
