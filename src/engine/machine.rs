//! Workflow state machine.
//!
//! Transitions are a pure function of the current workflow projection and
//! the incoming event. IO is never performed here; the returned
//! [`Transition`] carries declarative side effects for the handler to
//! execute, which keeps every branch unit-testable in isolation.

use serde_json::Value;

use crate::domain::{
    signal_updates_for, ActorId, EventEnvelope, EventPayload, Outcome, SignalMap, WorkflowRecord,
    WorkflowState,
};
use crate::infra::{OrchestratorError, Result};
use crate::risk::RiskResult;

/// Outcome of a risk invocation, fed back into the machine as the internal
/// `risk.returned` step.
#[derive(Debug, Clone)]
pub enum RiskDisposition {
    Evaluated(RiskResult),
    /// Risk unavailable after the retry budget; `transient` selects the
    /// fallback reason code.
    Unavailable { transient: bool, detail: String },
}

/// Declarative side effects returned to the serializer's handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Required signal set is complete; call the risk service.
    InvokeRisk,
    /// Risk returned; the authority must finalise a decision.
    EmitDecision,
    /// A human override must produce a new, superseding decision.
    EmitOverrideDecision {
        new_outcome: Outcome,
        reason: String,
        authorized_by: ActorId,
    },
}

/// Result of a transition: optional state change, signal updates, effects.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub next_state: Option<WorkflowState>,
    pub signal_updates: Vec<(String, Value)>,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    /// Whether the handler must write workflow state for this transition.
    pub fn has_writes(&self) -> bool {
        self.next_state.is_some() || !self.signal_updates.is_empty()
    }
}

/// Events the machine consumes: external envelopes, plus the internal
/// risk-returned step synthesised by the handler.
#[derive(Debug)]
pub enum MachineEvent<'a> {
    External(&'a EventEnvelope),
    RiskReturned(&'a RiskDisposition),
}

/// Compute the transition for an event against the current projection.
///
/// `signals_complete` is the per-jurisdiction required-signal predicate,
/// supplied as data so the machine stays jurisdiction-agnostic.
pub fn transition(
    workflow: &WorkflowRecord,
    signals_complete: &(dyn Fn(&SignalMap) -> bool + Sync),
    event: MachineEvent<'_>,
) -> Result<Transition> {
    match event {
        MachineEvent::External(envelope) => external_transition(workflow, signals_complete, envelope),
        MachineEvent::RiskReturned(_) => risk_returned_transition(workflow),
    }
}

fn external_transition(
    workflow: &WorkflowRecord,
    signals_complete: &(dyn Fn(&SignalMap) -> bool + Sync),
    envelope: &EventEnvelope,
) -> Result<Transition> {
    match &envelope.payload {
        EventPayload::OverrideApplied {
            new_outcome,
            reason,
            authorized_by,
        } => {
            if !workflow.state.has_current_decision() || workflow.current_decision_id.is_none() {
                return Err(OrchestratorError::InvalidOverrideTarget {
                    workflow_id: workflow.workflow_id.clone(),
                });
            }
            Ok(Transition {
                next_state: Some(WorkflowState::Superseded),
                signal_updates: Vec::new(),
                effects: vec![SideEffect::EmitOverrideDecision {
                    new_outcome: *new_outcome,
                    reason: reason.clone(),
                    authorized_by: authorized_by.clone(),
                }],
            })
        }
        payload => signal_transition(workflow, signals_complete, payload),
    }
}

fn signal_transition(
    workflow: &WorkflowRecord,
    signals_complete: &(dyn Fn(&SignalMap) -> bool + Sync),
    payload: &EventPayload,
) -> Result<Transition> {
    let signal_updates = signal_updates_for(payload);

    // Predicate is evaluated on the post-update signal set.
    let mut merged = workflow.signals.clone();
    merged.merge(&signal_updates);

    match workflow.state {
        WorkflowState::Pending | WorkflowState::SignalsCollected => {
            let collected = match payload {
                // A match result before any capture event is out of order:
                // the signal is recorded but does not begin collection.
                EventPayload::MatchCompleted { .. } => {
                    workflow.state == WorkflowState::SignalsCollected
                }
                _ => true,
            };

            if collected && signals_complete(&merged) {
                // Internal signals.complete: at most once per workflow,
                // because the state leaves SignalsCollected here.
                Ok(Transition {
                    next_state: Some(WorkflowState::RiskEvaluated),
                    signal_updates,
                    effects: vec![SideEffect::InvokeRisk],
                })
            } else {
                let next_state = if collected && workflow.state == WorkflowState::Pending {
                    Some(WorkflowState::SignalsCollected)
                } else {
                    None
                };
                Ok(Transition {
                    next_state,
                    signal_updates,
                    effects: Vec::new(),
                })
            }
        }
        WorkflowState::RiskEvaluated => {
            // Normally a signal here just accumulates. A workflow can only be
            // observed in this state by a later event if a previous handler
            // died between the state write and finalisation; re-arm risk so
            // the workflow is not stranded. Decision idempotency keeps the
            // recovery safe.
            let effects = if workflow.current_decision_id.is_none() && signals_complete(&merged) {
                vec![SideEffect::InvokeRisk]
            } else {
                Vec::new()
            };
            Ok(Transition {
                next_state: None,
                signal_updates,
                effects,
            })
        }
        // Late arrivals are recorded but never re-open a resolved workflow.
        WorkflowState::Finalised | WorkflowState::Superseded => Ok(Transition {
            next_state: None,
            signal_updates,
            effects: Vec::new(),
        }),
    }
}

fn risk_returned_transition(workflow: &WorkflowRecord) -> Result<Transition> {
    if workflow.state != WorkflowState::RiskEvaluated {
        return Err(OrchestratorError::InvariantViolation {
            invariant: "risk_returned_in_risk_evaluated",
            message: format!(
                "risk returned for workflow {} in state {}",
                workflow.workflow_id, workflow.state
            ),
        });
    }
    Ok(Transition {
        next_state: Some(WorkflowState::Finalised),
        signal_updates: Vec::new(),
        effects: vec![SideEffect::EmitDecision],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        signals, DecisionId, EventId, EventSubmission, SignalMap, TenantId, WorkflowId,
    };
    use chrono::Utc;
    use serde_json::json;

    fn workflow(state: WorkflowState) -> WorkflowRecord {
        let mut wf = WorkflowRecord::new(
            WorkflowId::new("wf1"),
            TenantId::new("cu-001"),
            Utc::now(),
        );
        wf.state = state;
        wf
    }

    fn envelope(event_type: &str, payload: Value) -> EventEnvelope {
        EventEnvelope::validate(EventSubmission {
            event_id: Some(format!("evt-{event_type}")),
            event_type: event_type.to_string(),
            workflow_id: "wf1".to_string(),
            tenant_id: "cu-001".to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            payload,
        })
        .unwrap()
    }

    fn selfie() -> EventEnvelope {
        envelope(
            "selfie.uploaded",
            json!({"liveness_score": 0.85, "confidence": 0.9}),
        )
    }

    fn document() -> EventEnvelope {
        envelope(
            "document.uploaded",
            json!({"document_type": "passport", "quality_score": 0.9}),
        )
    }

    fn match_completed() -> EventEnvelope {
        envelope("match.completed", json!({"match_score": 0.88}))
    }

    fn override_applied() -> EventEnvelope {
        envelope(
            "override.applied",
            json!({"new_outcome": "decline", "reason": "manual review", "authorized_by": "inv_007"}),
        )
    }

    fn requires_all(signals: &SignalMap) -> bool {
        [
            signals::LIVENESS_SCORE,
            signals::DOCUMENT_QUALITY,
            signals::MATCH_SCORE,
        ]
        .iter()
        .all(|name| signals.contains(name))
    }

    fn never(_: &SignalMap) -> bool {
        false
    }

    #[test]
    fn pending_selfie_collects_signals() {
        let wf = workflow(WorkflowState::Pending);
        let ev = selfie();
        let t = transition(&wf, &requires_all, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.next_state, Some(WorkflowState::SignalsCollected));
        assert!(t.effects.is_empty());
        assert!(!t.signal_updates.is_empty());
    }

    #[test]
    fn completing_signal_set_invokes_risk_exactly_once() {
        let mut wf = workflow(WorkflowState::SignalsCollected);
        wf.signals.set(signals::LIVENESS_SCORE, json!(0.85));
        wf.signals.set(signals::DOCUMENT_QUALITY, json!(0.9));

        let ev = match_completed();
        let t = transition(&wf, &requires_all, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.next_state, Some(WorkflowState::RiskEvaluated));
        assert_eq!(t.effects, vec![SideEffect::InvokeRisk]);
    }

    #[test]
    fn incomplete_signal_set_stays_collecting() {
        let wf = workflow(WorkflowState::SignalsCollected);
        let ev = document();
        let t = transition(&wf, &requires_all, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.next_state, None);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn match_before_capture_is_out_of_order() {
        let wf = workflow(WorkflowState::Pending);
        let ev = match_completed();
        // Even a permissive predicate does not fire from Pending on a match.
        let t = transition(&wf, &|_| true, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.next_state, None);
        assert!(t.effects.is_empty());
        // The signal itself is still recorded.
        assert!(!t.signal_updates.is_empty());
    }

    #[test]
    fn late_signals_after_finalisation_do_not_reopen() {
        let mut wf = workflow(WorkflowState::Finalised);
        wf.current_decision_id = Some(DecisionId::derive(
            &wf.workflow_id,
            &EventId::new("cause"),
            "auth",
        ));
        let ev = selfie();
        let t = transition(&wf, &|_| true, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.next_state, None);
        assert!(t.effects.is_empty());
        assert!(!t.signal_updates.is_empty());
    }

    #[test]
    fn risk_evaluated_does_not_retrigger_when_decided() {
        let mut wf = workflow(WorkflowState::RiskEvaluated);
        wf.current_decision_id = Some(DecisionId::derive(
            &wf.workflow_id,
            &EventId::new("cause"),
            "auth",
        ));
        let ev = selfie();
        let t = transition(&wf, &|_| true, MachineEvent::External(&ev)).unwrap();
        assert!(t.effects.is_empty());
    }

    #[test]
    fn stranded_risk_evaluated_workflow_rearms_risk() {
        let mut wf = workflow(WorkflowState::RiskEvaluated);
        wf.signals.set(signals::LIVENESS_SCORE, json!(0.85));
        wf.signals.set(signals::DOCUMENT_QUALITY, json!(0.9));
        wf.signals.set(signals::MATCH_SCORE, json!(0.88));

        let ev = selfie();
        let t = transition(&wf, &requires_all, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.effects, vec![SideEffect::InvokeRisk]);
    }

    #[test]
    fn override_on_finalised_emits_superseding_decision() {
        let mut wf = workflow(WorkflowState::Finalised);
        wf.current_decision_id = Some(DecisionId::derive(
            &wf.workflow_id,
            &EventId::new("cause"),
            "auth",
        ));

        let ev = override_applied();
        let t = transition(&wf, &never, MachineEvent::External(&ev)).unwrap();
        assert_eq!(t.next_state, Some(WorkflowState::Superseded));
        match &t.effects[..] {
            [SideEffect::EmitOverrideDecision {
                new_outcome,
                reason,
                authorized_by,
            }] => {
                assert_eq!(*new_outcome, Outcome::Decline);
                assert_eq!(reason, "manual review");
                assert_eq!(authorized_by.as_str(), "inv_007");
            }
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    #[test]
    fn override_without_prior_decision_is_rejected() {
        let wf = workflow(WorkflowState::SignalsCollected);
        let ev = override_applied();
        let err = transition(&wf, &never, MachineEvent::External(&ev)).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidOverrideTarget { .. }
        ));
    }

    #[test]
    fn risk_returned_finalises() {
        let wf = workflow(WorkflowState::RiskEvaluated);
        let disposition = RiskDisposition::Unavailable {
            transient: true,
            detail: "down".to_string(),
        };
        let t = transition(&wf, &never, MachineEvent::RiskReturned(&disposition)).unwrap();
        assert_eq!(t.next_state, Some(WorkflowState::Finalised));
        assert_eq!(t.effects, vec![SideEffect::EmitDecision]);
    }

    #[test]
    fn risk_returned_outside_risk_evaluated_is_invariant_violation() {
        let wf = workflow(WorkflowState::Pending);
        let disposition = RiskDisposition::Unavailable {
            transient: false,
            detail: "x".to_string(),
        };
        let err = transition(&wf, &never, MachineEvent::RiskReturned(&disposition)).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvariantViolation { .. }));
    }
}
