//! Decision authority: the single source of truth for finalised decisions.
//!
//! This is the only component that constructs [`DecisionRecord`]s and the
//! only caller of `WorkflowStore::append_decision`. Every other code path
//! reaches a decision exclusively through [`DecisionAuthority::finalise`];
//! keeping that call graph narrow is what makes the single-emitter invariant
//! auditable.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::domain::{
    signals, ActorId, Authority, DecisionId, DecisionRecord, EventEnvelope, Lineage, Outcome,
    RiskSummary, Subject, WorkflowMutation, WorkflowRecord, WorkflowState,
};
use crate::infra::{DecisionPublisher, Result, WorkflowStore};
use crate::policy::PolicyRegistry;

use super::machine::RiskDisposition;

/// Reason codes for decisions finalised without a risk result.
pub const REASON_RISK_UNAVAILABLE_TRANSIENT: &str = "risk_unavailable_transient";
pub const REASON_RISK_UNAVAILABLE_PERMANENT: &str = "risk_unavailable_permanent";

/// Identity stamped into the `authority` block and the decision-id hash.
#[derive(Debug, Clone)]
pub struct AuthorityIdentity {
    pub decided_by: String,
    pub service_version: String,
}

impl Default for AuthorityIdentity {
    fn default() -> Self {
        Self {
            decided_by: "decision-orchestrator".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Context for a human override.
#[derive(Debug, Clone)]
pub struct OverrideContext {
    pub new_outcome: Outcome,
    pub reason: String,
    pub authorized_by: ActorId,
}

/// What the decision is based on.
#[derive(Debug, Clone)]
pub enum DecisionBasis {
    Risk(RiskDisposition),
    Override(OverrideContext),
}

/// The single emitter of `decision.finalised`.
pub struct DecisionAuthority {
    store: Arc<dyn WorkflowStore>,
    publisher: Arc<dyn DecisionPublisher>,
    policies: Arc<PolicyRegistry>,
    identity: AuthorityIdentity,
}

impl DecisionAuthority {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        publisher: Arc<dyn DecisionPublisher>,
        policies: Arc<PolicyRegistry>,
        identity: AuthorityIdentity,
    ) -> Self {
        Self {
            store,
            publisher,
            policies,
            identity,
        }
    }

    /// Finalise a decision for `workflow` caused by `cause_event`.
    ///
    /// The decision id is a deterministic hash of the workflow, the causing
    /// event, and this authority, so re-delivery of the same cause collapses
    /// to a single stored decision: the store reports the duplicate and the
    /// existing record is returned without re-publication.
    #[instrument(skip_all, fields(
        workflow_id = %workflow.workflow_id,
        cause_event_id = %cause_event.event_id,
    ))]
    pub async fn finalise(
        &self,
        workflow: &WorkflowRecord,
        cause_event: &EventEnvelope,
        basis: DecisionBasis,
    ) -> Result<DecisionRecord> {
        let decision = self.assemble(workflow, cause_event, basis);

        let outcome = self
            .store
            .append_decision(&workflow.workflow_id, workflow.version, decision)
            .await?;

        match outcome {
            crate::infra::AppendOutcome::Appended(record) => {
                info!(
                    decision_id = %record.decision_id,
                    outcome = %record.outcome,
                    is_override = record.authority.is_override,
                    supersedes = ?record.lineage.supersedes_decision_id.map(|d| d.to_hex()),
                    "decision finalised"
                );
                self.publisher.publish(&record).await?;
                Ok(record)
            }
            crate::infra::AppendOutcome::Duplicate(existing) => {
                debug!(
                    decision_id = %existing.decision_id,
                    "decision already appended; returning existing record"
                );
                // A redelivered override can observe the transient superseded
                // state written before the original append; settle it back.
                if workflow.state == WorkflowState::Superseded {
                    self.store
                        .apply(
                            &workflow.workflow_id,
                            workflow.version,
                            WorkflowMutation {
                                state: Some(WorkflowState::Finalised),
                                signal_updates: Vec::new(),
                            },
                        )
                        .await?;
                }
                Ok(existing)
            }
        }
    }

    fn assemble(
        &self,
        workflow: &WorkflowRecord,
        cause_event: &EventEnvelope,
        basis: DecisionBasis,
    ) -> DecisionRecord {
        let pack = self.policies.pack_for(&workflow.tenant_id);

        let (outcome, confidence, reason_codes, risk_summary, override_ctx) = match basis {
            DecisionBasis::Override(ctx) => (
                ctx.new_outcome,
                // A human decision is taken at face value.
                1.0,
                vec![ctx.reason.clone()],
                RiskSummary::default(),
                Some(ctx),
            ),
            DecisionBasis::Risk(RiskDisposition::Evaluated(result)) => {
                let outcome = pack.outcome_mapping.outcome_for(result.band);
                let reason_codes = if result.factors.is_empty() {
                    vec![format!("risk_band_{}", result.band)]
                } else {
                    result.factors.clone()
                };
                let summary = RiskSummary {
                    band: Some(result.band),
                    score: Some(result.score),
                    factors: result.factors,
                    detail: result.detail,
                };
                (outcome, result.confidence, reason_codes, summary, None)
            }
            DecisionBasis::Risk(RiskDisposition::Unavailable { transient, detail }) => {
                let (outcome, reason) = if transient {
                    (Outcome::Review, REASON_RISK_UNAVAILABLE_TRANSIENT)
                } else {
                    (Outcome::Decline, REASON_RISK_UNAVAILABLE_PERMANENT)
                };
                let summary = RiskSummary {
                    band: None,
                    score: None,
                    factors: Vec::new(),
                    detail: serde_json::json!({ "error": detail }),
                };
                (outcome, 0.0, vec![reason.to_string()], summary, None)
            }
        };

        let is_override = override_ctx.is_some();
        let lineage = Lineage {
            supersedes_decision_id: if is_override {
                workflow.current_decision_id
            } else {
                None
            },
        };

        DecisionRecord {
            decision_id: DecisionId::derive(
                &workflow.workflow_id,
                &cause_event.event_id,
                &self.identity.decided_by,
            ),
            workflow_id: workflow.workflow_id.clone(),
            tenant_id: workflow.tenant_id.clone(),
            cause_event_id: cause_event.event_id.clone(),
            outcome,
            confidence,
            reason_codes,
            risk_summary,
            policy: pack.policy_ref(),
            authority: Authority {
                decided_by: self.identity.decided_by.clone(),
                service_version: self.identity.service_version.clone(),
                is_override,
                actor_id: override_ctx.map(|ctx| ctx.authorized_by),
            },
            lineage,
            subject: subject_for(workflow),
            correlation_id: cause_event.correlation_id.clone(),
            // Derived from the causing event, never the wall clock, so
            // replays reproduce identical records.
            timestamp: cause_event.timestamp,
        }
    }
}

fn subject_for(workflow: &WorkflowRecord) -> Subject {
    let subject_id = workflow
        .signals
        .as_str(signals::SUBJECT_ID)
        .unwrap_or(workflow.workflow_id.as_str())
        .to_string();
    let action = workflow
        .signals
        .as_str(signals::SUBJECT_ACTION)
        .unwrap_or("onboarding")
        .to_string();
    Subject {
        subject_type: "user".to_string(),
        subject_id,
        action,
    }
}
