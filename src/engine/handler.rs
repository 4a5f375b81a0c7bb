//! The per-event handler executed under the workflow serializer.
//!
//! One invocation drives an event through: load projection, pure transition,
//! durable state write, risk invocation (when the signal set completes), and
//! finalisation through the decision authority. All IO failures surface as
//! taxonomy errors so the serializer can decide between retry and
//! dead-letter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::{RiskConfig, TransientFallback};
use crate::domain::{EventEnvelope, SignalMap, WorkflowMutation, WorkflowRecord};
use crate::infra::{OrchestratorError, Result, WorkflowStore};
use crate::policy::PolicyRegistry;
use crate::risk::{evaluate_with_policy, RiskError, RiskEvaluator, RiskSnapshot};

use super::authority::{DecisionAuthority, DecisionBasis, OverrideContext};
use super::machine::{self, MachineEvent, RiskDisposition, SideEffect};
use super::serializer::EventHandler;

/// Bounded reload-and-retry on optimistic-concurrency conflicts.
const STALE_RETRY_BOUND: u32 = 3;

/// Production event handler.
pub struct WorkflowEventHandler {
    store: Arc<dyn WorkflowStore>,
    risk: Arc<dyn RiskEvaluator>,
    authority: Arc<DecisionAuthority>,
    policies: Arc<PolicyRegistry>,
    risk_config: RiskConfig,
}

impl WorkflowEventHandler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        risk: Arc<dyn RiskEvaluator>,
        authority: Arc<DecisionAuthority>,
        policies: Arc<PolicyRegistry>,
        risk_config: RiskConfig,
    ) -> Self {
        Self {
            store,
            risk,
            authority,
            policies,
            risk_config,
        }
    }

    #[instrument(skip_all, fields(
        workflow_id = %event.workflow_id,
        event_id = %event.event_id,
        event_type = %event.kind(),
    ))]
    async fn process_once(&self, event: &EventEnvelope) -> Result<()> {
        let (workflow, _) = self
            .store
            .load(&event.workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(event.workflow_id.clone()))?;

        let pack = self.policies.pack_for(&workflow.tenant_id);
        let signals_complete = |s: &SignalMap| pack.signals_complete(s);

        let transition =
            machine::transition(&workflow, &signals_complete, MachineEvent::External(event))?;

        let workflow = if transition.has_writes() {
            self.store
                .apply(
                    &workflow.workflow_id,
                    workflow.version,
                    WorkflowMutation {
                        state: transition.next_state,
                        signal_updates: transition.signal_updates.clone(),
                    },
                )
                .await?
        } else {
            debug!("event recorded as no-op for workflow state");
            workflow
        };

        for effect in transition.effects {
            match effect {
                SideEffect::InvokeRisk => {
                    self.invoke_risk_and_finalise(&workflow, event, &signals_complete)
                        .await?;
                }
                SideEffect::EmitOverrideDecision {
                    new_outcome,
                    reason,
                    authorized_by,
                } => {
                    self.authority
                        .finalise(
                            &workflow,
                            event,
                            DecisionBasis::Override(OverrideContext {
                                new_outcome,
                                reason,
                                authorized_by,
                            }),
                        )
                        .await?;
                }
                SideEffect::EmitDecision => {
                    // EmitDecision only follows the internal risk.returned
                    // step, which this handler synthesises itself.
                    return Err(OrchestratorError::InvariantViolation {
                        invariant: "emit_decision_follows_risk_returned",
                        message: "state machine emitted a decision without a risk result"
                            .to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Call the risk service and feed the internal `risk.returned` step back
    /// through the machine, finalising on `EmitDecision`.
    async fn invoke_risk_and_finalise(
        &self,
        workflow: &WorkflowRecord,
        cause_event: &EventEnvelope,
        signals_complete: &(dyn Fn(&SignalMap) -> bool + Sync),
    ) -> Result<()> {
        let pack = self.policies.pack_for(&workflow.tenant_id);
        let snapshot = RiskSnapshot {
            workflow_id: workflow.workflow_id.clone(),
            tenant_id: workflow.tenant_id.clone(),
            jurisdiction: pack.jurisdiction.clone(),
            signals: workflow.signals.clone(),
        };

        let disposition =
            match evaluate_with_policy(self.risk.as_ref(), &snapshot, &self.risk_config).await {
                Ok(result) => RiskDisposition::Evaluated(result),
                Err(RiskError::Transient(detail)) => {
                    if self.risk_config.transient_fallback == TransientFallback::Retain {
                        // Leave the event in the queue for a later attempt
                        // instead of finalising a review.
                        return Err(OrchestratorError::RiskTransient(detail));
                    }
                    RiskDisposition::Unavailable {
                        transient: true,
                        detail,
                    }
                }
                Err(RiskError::Permanent(detail)) => RiskDisposition::Unavailable {
                    transient: false,
                    detail,
                },
            };

        let transition = machine::transition(
            workflow,
            signals_complete,
            MachineEvent::RiskReturned(&disposition),
        )?;

        if transition
            .effects
            .iter()
            .any(|e| matches!(e, SideEffect::EmitDecision))
        {
            self.authority
                .finalise(workflow, cause_event, DecisionBasis::Risk(disposition))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for WorkflowEventHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.process_once(event).await {
                Err(OrchestratorError::StaleVersion { workflow_id, expected })
                    if attempt < STALE_RETRY_BOUND =>
                {
                    debug!(
                        workflow_id = %workflow_id,
                        expected,
                        attempt,
                        "stale version; reloading and retrying"
                    );
                }
                other => return other,
            }
        }
    }
}
