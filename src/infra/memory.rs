//! In-memory workflow store.
//!
//! Implements the full store contract, including version checks and
//! decision-id uniqueness, for unit tests, property suites, and local runs
//! without a database. The SQLite store is the durable implementation.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{
    DecisionId, DecisionRecord, EventEnvelope, EventId, TenantId, WorkflowId, WorkflowMutation,
    WorkflowRecord, WorkflowState,
};

use super::{
    AppendOutcome, OrchestratorError, RecordOutcome, Result, WorkflowFilter, WorkflowStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventStatus {
    Pending,
    Processed,
    Failed,
}

struct Inner {
    workflows: HashMap<WorkflowId, WorkflowRecord>,
    decisions: HashMap<WorkflowId, Vec<DecisionRecord>>,
    decision_ids: HashMap<DecisionId, WorkflowId>,
    events: HashMap<EventId, (EventEnvelope, EventStatus)>,
    /// Insertion order of workflows, newest listing first.
    order: Vec<WorkflowId>,
}

/// In-memory implementation of [`WorkflowStore`].
pub struct MemoryWorkflowStore {
    inner: Mutex<Inner>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                workflows: HashMap::new(),
                decisions: HashMap::new(),
                decision_ids: HashMap::new(),
                events: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-write; the store state can no
        // longer be trusted, so propagate the panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn record_event(&self, event: &EventEnvelope) -> Result<RecordOutcome> {
        let mut inner = self.lock();
        if let Some((_, status)) = inner.events.get(&event.event_id) {
            return Ok(RecordOutcome::Duplicate {
                processed: *status == EventStatus::Processed,
            });
        }
        inner
            .events
            .insert(event.event_id.clone(), (event.clone(), EventStatus::Pending));
        Ok(RecordOutcome::New)
    }

    async fn mark_event_processed(&self, event_id: &EventId) -> Result<()> {
        let mut inner = self.lock();
        if let Some((_, status)) = inner.events.get_mut(event_id) {
            *status = EventStatus::Processed;
        }
        Ok(())
    }

    async fn mark_event_failed(&self, event_id: &EventId, _reason: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some((_, status)) = inner.events.get_mut(event_id) {
            *status = EventStatus::Failed;
        }
        Ok(())
    }

    async fn load(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<(WorkflowRecord, Vec<DecisionRecord>)>> {
        let inner = self.lock();
        Ok(inner.workflows.get(workflow_id).map(|wf| {
            let decisions = inner
                .decisions
                .get(workflow_id)
                .cloned()
                .unwrap_or_default();
            (wf.clone(), decisions)
        }))
    }

    async fn create_if_absent(
        &self,
        workflow_id: &WorkflowId,
        tenant_id: &TenantId,
    ) -> Result<WorkflowRecord> {
        let mut inner = self.lock();
        if let Some(existing) = inner.workflows.get(workflow_id) {
            return Ok(existing.clone());
        }
        let wf = WorkflowRecord::new(workflow_id.clone(), tenant_id.clone(), Utc::now());
        inner.workflows.insert(workflow_id.clone(), wf.clone());
        inner.order.push(workflow_id.clone());
        Ok(wf)
    }

    async fn apply(
        &self,
        workflow_id: &WorkflowId,
        expected_version: u64,
        mutation: WorkflowMutation,
    ) -> Result<WorkflowRecord> {
        let mut inner = self.lock();
        let wf = inner
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.clone()))?;

        if wf.version != expected_version {
            return Err(OrchestratorError::StaleVersion {
                workflow_id: workflow_id.clone(),
                expected: expected_version,
            });
        }

        if let Some(state) = mutation.state {
            wf.state = state;
        }
        wf.signals.merge(&mutation.signal_updates);
        wf.version += 1;
        wf.updated_at = Utc::now();
        Ok(wf.clone())
    }

    async fn append_decision(
        &self,
        workflow_id: &WorkflowId,
        expected_version: u64,
        decision: DecisionRecord,
    ) -> Result<AppendOutcome> {
        let mut inner = self.lock();

        if let Some(owner) = inner.decision_ids.get(&decision.decision_id).cloned() {
            let existing = inner
                .decisions
                .get(&owner)
                .and_then(|log| {
                    log.iter()
                        .find(|d| d.decision_id == decision.decision_id)
                        .cloned()
                })
                .ok_or_else(|| OrchestratorError::InvariantViolation {
                    invariant: "decision_log_append_only",
                    message: format!("indexed decision {} missing from log", decision.decision_id),
                })?;
            return Ok(AppendOutcome::Duplicate(existing));
        }

        let wf = inner
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.clone()))?;

        if wf.version != expected_version {
            return Err(OrchestratorError::StaleVersion {
                workflow_id: workflow_id.clone(),
                expected: expected_version,
            });
        }

        wf.current_decision_id = Some(decision.decision_id);
        wf.state = WorkflowState::Finalised;
        wf.version += 1;
        wf.updated_at = Utc::now();

        inner
            .decision_ids
            .insert(decision.decision_id, workflow_id.clone());
        inner
            .decisions
            .entry(workflow_id.clone())
            .or_default()
            .push(decision.clone());

        Ok(AppendOutcome::Appended(decision))
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<WorkflowRecord>> {
        let inner = self.lock();
        let limit = filter.limit.unwrap_or(100);
        let mut out = Vec::new();
        for id in inner.order.iter().rev() {
            let Some(wf) = inner.workflows.get(id) else {
                continue;
            };
            if let Some(tenant) = &filter.tenant_id {
                if &wf.tenant_id != tenant {
                    continue;
                }
            }
            if let Some(state) = filter.state {
                if wf.state != state {
                    continue;
                }
            }
            if let Some(after) = filter.created_after {
                if wf.created_at < after {
                    continue;
                }
            }
            if let Some(before) = filter.created_before {
                if wf.created_at > before {
                    continue;
                }
            }
            out.push(wf.clone());
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Authority, DecisionId, EventSubmission, Jurisdiction, Lineage, Outcome, PolicyRef,
        RiskSummary, Subject,
    };
    use serde_json::json;

    fn envelope(event_id: &str, workflow_id: &str) -> EventEnvelope {
        EventEnvelope::validate(EventSubmission {
            event_id: Some(event_id.to_string()),
            event_type: "selfie.uploaded".to_string(),
            workflow_id: workflow_id.to_string(),
            tenant_id: "cu-001".to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            payload: json!({"liveness_score": 0.8, "confidence": 0.9}),
        })
        .unwrap()
    }

    fn decision(workflow_id: &str, cause: &str) -> DecisionRecord {
        let wf = WorkflowId::new(workflow_id);
        let cause = EventId::new(cause);
        DecisionRecord {
            decision_id: DecisionId::derive(&wf, &cause, "test-authority"),
            workflow_id: wf,
            tenant_id: TenantId::new("cu-001"),
            cause_event_id: cause,
            outcome: Outcome::Approve,
            confidence: 0.9,
            reason_codes: vec![],
            risk_summary: RiskSummary::default(),
            policy: PolicyRef {
                jurisdiction: Jurisdiction::au(),
                pack_id: "au-core".to_string(),
                pack_version: "1.0.0".to_string(),
            },
            authority: Authority {
                decided_by: "test-authority".to_string(),
                service_version: "0.0.0".to_string(),
                is_override: false,
                actor_id: None,
            },
            lineage: Lineage::default(),
            subject: Subject {
                subject_type: "user".to_string(),
                subject_id: "wf1".to_string(),
                action: "onboarding".to_string(),
            },
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_event_detects_duplicates() {
        let store = MemoryWorkflowStore::new();
        let ev = envelope("e1", "wf1");

        assert_eq!(store.record_event(&ev).await.unwrap(), RecordOutcome::New);
        assert_eq!(
            store.record_event(&ev).await.unwrap(),
            RecordOutcome::Duplicate { processed: false }
        );

        store.mark_event_processed(&ev.event_id).await.unwrap();
        assert_eq!(
            store.record_event(&ev).await.unwrap(),
            RecordOutcome::Duplicate { processed: true }
        );
    }

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let store = MemoryWorkflowStore::new();
        let id = WorkflowId::new("wf1");
        let tenant = TenantId::new("cu-001");

        let a = store.create_if_absent(&id, &tenant).await.unwrap();
        let b = store.create_if_absent(&id, &tenant).await.unwrap();
        assert_eq!(a.version, b.version);
        assert_eq!(a.created_at, b.created_at);
    }

    #[tokio::test]
    async fn apply_rejects_stale_version() {
        let store = MemoryWorkflowStore::new();
        let id = WorkflowId::new("wf1");
        store
            .create_if_absent(&id, &TenantId::new("cu-001"))
            .await
            .unwrap();

        let updated = store
            .apply(&id, 0, WorkflowMutation::default())
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        let err = store
            .apply(&id, 0, WorkflowMutation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::StaleVersion { .. }));
    }

    #[tokio::test]
    async fn append_decision_is_idempotent_on_decision_id() {
        let store = MemoryWorkflowStore::new();
        let id = WorkflowId::new("wf1");
        store
            .create_if_absent(&id, &TenantId::new("cu-001"))
            .await
            .unwrap();

        let d = decision("wf1", "e1");
        let first = store.append_decision(&id, 0, d.clone()).await.unwrap();
        assert!(first.is_new());

        // Same decision_id again: no-op, no version bump, identical record.
        let second = store.append_decision(&id, 1, d.clone()).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(second.record().decision_id, d.decision_id);

        let (wf, log) = store.load(&id).await.unwrap().unwrap();
        assert_eq!(wf.version, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(wf.state, WorkflowState::Finalised);
        assert_eq!(wf.current_decision_id, Some(d.decision_id));
    }

    #[tokio::test]
    async fn list_workflows_filters_by_tenant_and_state() {
        let store = MemoryWorkflowStore::new();
        store
            .create_if_absent(&WorkflowId::new("wf1"), &TenantId::new("cu-001"))
            .await
            .unwrap();
        store
            .create_if_absent(&WorkflowId::new("wf2"), &TenantId::new("cu-002"))
            .await
            .unwrap();

        let filter = WorkflowFilter {
            tenant_id: Some(TenantId::new("cu-001")),
            ..Default::default()
        };
        let listed = store.list_workflows(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_id, WorkflowId::new("wf1"));

        let filter = WorkflowFilter {
            state: Some(WorkflowState::Finalised),
            ..Default::default()
        };
        assert!(store.list_workflows(&filter).await.unwrap().is_empty());
    }
}
