//! Event envelope, typed payloads, and ingress validation.
//!
//! The wire shape ([`EventSubmission`]) carries an untyped JSON payload; the
//! validator turns it into an [`EventEnvelope`] whose payload is a closed
//! variant per event kind, so downstream components match exhaustively and
//! never reach into loose JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::infra::{OrchestratorError, Result};

use super::{ActorId, CorrelationId, EventId, Outcome, TenantId, WorkflowId};

/// Inbound event kinds accepted on the wire.
///
/// `signals.complete` and `risk.returned` are internal steps of the state
/// machine and are rejected by the validator when submitted from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "selfie.uploaded")]
    SelfieUploaded,
    #[serde(rename = "document.uploaded")]
    DocumentUploaded,
    #[serde(rename = "match.completed")]
    MatchCompleted,
    #[serde(rename = "override.applied")]
    OverrideApplied,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SelfieUploaded => "selfie.uploaded",
            EventKind::DocumentUploaded => "document.uploaded",
            EventKind::MatchCompleted => "match.completed",
            EventKind::OverrideApplied => "override.applied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "selfie.uploaded" => Some(EventKind::SelfieUploaded),
            "document.uploaded" => Some(EventKind::DocumentUploaded),
            "match.completed" => Some(EventKind::MatchCompleted),
            "override.applied" => Some(EventKind::OverrideApplied),
            _ => None,
        }
    }

    /// Event types that exist only inside the pipeline.
    pub fn is_internal_name(s: &str) -> bool {
        matches!(s, "signals.complete" | "risk.returned" | "decision.finalised")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed payload per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    SelfieUploaded {
        liveness_score: f64,
        confidence: f64,
        #[serde(default)]
        face_centered: bool,
        #[serde(default)]
        face_size: f64,
    },
    DocumentUploaded {
        document_type: String,
        quality_score: f64,
    },
    MatchCompleted {
        match_score: f64,
        #[serde(default)]
        model_ids: Vec<String>,
    },
    OverrideApplied {
        new_outcome: Outcome,
        reason: String,
        authorized_by: ActorId,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SelfieUploaded { .. } => EventKind::SelfieUploaded,
            EventPayload::DocumentUploaded { .. } => EventKind::DocumentUploaded,
            EventPayload::MatchCompleted { .. } => EventKind::MatchCompleted,
            EventPayload::OverrideApplied { .. } => EventKind::OverrideApplied,
        }
    }
}

/// Raw envelope as submitted over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubmission {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    pub workflow_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Validated, well-typed event envelope.
///
/// Immutable once constructed; persisted verbatim and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub workflow_id: WorkflowId,
    pub tenant_id: TenantId,
    pub correlation_id: Option<CorrelationId>,
    /// Normalised to UTC on ingress.
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Validate a wire submission into a typed envelope.
    ///
    /// Identifiers are trimmed, timestamps normalised to UTC, and the payload
    /// parsed against the schema of the declared event type.
    pub fn validate(submission: EventSubmission) -> Result<Self> {
        let event_type = submission.event_type.trim();
        if event_type.is_empty() {
            return Err(OrchestratorError::MalformedEvent(
                "event_type is required".to_string(),
            ));
        }
        if EventKind::is_internal_name(event_type) {
            return Err(OrchestratorError::MalformedEvent(format!(
                "event type {event_type} is internal and not accepted on the wire"
            )));
        }
        let kind = EventKind::parse(event_type)
            .ok_or_else(|| OrchestratorError::UnknownEventType(event_type.to_string()))?;

        let workflow_id = WorkflowId::new(submission.workflow_id);
        if workflow_id.as_str().is_empty() {
            return Err(OrchestratorError::MalformedEvent(
                "workflow_id is required".to_string(),
            ));
        }
        let tenant_id = TenantId::new(submission.tenant_id);
        if tenant_id.as_str().is_empty() {
            return Err(OrchestratorError::MalformedEvent(
                "tenant_id is required".to_string(),
            ));
        }

        let event_id = match submission.event_id {
            Some(raw) => {
                let id = EventId::new(raw);
                if id.as_str().is_empty() {
                    return Err(OrchestratorError::MalformedEvent(
                        "event_id must not be blank".to_string(),
                    ));
                }
                id
            }
            None => EventId::generate(),
        };

        let correlation_id = submission
            .correlation_id
            .map(CorrelationId::new)
            .filter(|c| !c.as_str().is_empty());

        let payload = parse_payload(kind, submission.payload)?;

        Ok(Self {
            event_id,
            workflow_id,
            tenant_id,
            correlation_id,
            timestamp: submission.timestamp.with_timezone(&Utc),
            payload,
        })
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

fn parse_payload(kind: EventKind, raw: Value) -> Result<EventPayload> {
    let malformed =
        |e: serde_json::Error| OrchestratorError::MalformedEvent(format!("{kind} payload: {e}"));

    match kind {
        EventKind::SelfieUploaded => {
            #[derive(Deserialize)]
            struct Raw {
                liveness_score: f64,
                confidence: f64,
                #[serde(default)]
                face_centered: bool,
                #[serde(default)]
                face_size: f64,
            }
            let p: Raw = serde_json::from_value(raw).map_err(malformed)?;
            if !(0.0..=1.0).contains(&p.liveness_score) {
                return Err(OrchestratorError::MalformedEvent(
                    "liveness_score must be within [0, 1]".to_string(),
                ));
            }
            Ok(EventPayload::SelfieUploaded {
                liveness_score: p.liveness_score,
                confidence: p.confidence,
                face_centered: p.face_centered,
                face_size: p.face_size,
            })
        }
        EventKind::DocumentUploaded => {
            #[derive(Deserialize)]
            struct Raw {
                document_type: String,
                quality_score: f64,
            }
            let p: Raw = serde_json::from_value(raw).map_err(malformed)?;
            if p.document_type.trim().is_empty() {
                return Err(OrchestratorError::MalformedEvent(
                    "document_type must not be blank".to_string(),
                ));
            }
            Ok(EventPayload::DocumentUploaded {
                document_type: p.document_type.trim().to_string(),
                quality_score: p.quality_score,
            })
        }
        EventKind::MatchCompleted => {
            #[derive(Deserialize)]
            struct Raw {
                match_score: f64,
                #[serde(default)]
                model_ids: Vec<String>,
            }
            let p: Raw = serde_json::from_value(raw).map_err(malformed)?;
            Ok(EventPayload::MatchCompleted {
                match_score: p.match_score,
                model_ids: p.model_ids,
            })
        }
        EventKind::OverrideApplied => {
            #[derive(Deserialize)]
            struct Raw {
                new_outcome: String,
                reason: String,
                authorized_by: String,
            }
            let p: Raw = serde_json::from_value(raw).map_err(malformed)?;
            let new_outcome = Outcome::parse(p.new_outcome.trim()).ok_or_else(|| {
                OrchestratorError::MalformedEvent(format!(
                    "new_outcome must be approve|review|decline, got {:?}",
                    p.new_outcome
                ))
            })?;
            if p.reason.trim().is_empty() {
                return Err(OrchestratorError::MalformedEvent(
                    "override reason must be non-empty".to_string(),
                ));
            }
            let authorized_by = ActorId::new(p.authorized_by);
            if authorized_by.as_str().is_empty() {
                return Err(OrchestratorError::MalformedEvent(
                    "authorized_by is required".to_string(),
                ));
            }
            Ok(EventPayload::OverrideApplied {
                new_outcome,
                reason: p.reason.trim().to_string(),
                authorized_by,
            })
        }
    }
}
