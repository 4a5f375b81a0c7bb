//! End-to-end pipeline tests: dispatcher -> serializer -> state machine ->
//! risk -> decision authority, over the in-memory store.

mod common;

use std::sync::Arc;

use decision_orchestrator::domain::{ActorId, DecisionId, EventId, Outcome, WorkflowState};
use decision_orchestrator::infra::MemoryWorkflowStore;
use decision_orchestrator::WorkflowId;
use decision_orchestrator::WorkflowStore;

use common::*;

const AUTHORITY: &str = "decision-orchestrator";

/// Scenario: happy path. Selfie, document, and match events complete the
/// required signal set; low risk maps to approve; exactly one decision with
/// a deterministic id.
#[tokio::test]
async fn happy_path_emits_single_approval() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let risk = StubRisk::low_risk();
    let (state, publisher) = pipeline(store.clone(), risk.clone(), &fast_config());

    for (id, kind, offset, payload) in [
        ("evt-selfie", "selfie.uploaded", 0, selfie_payload(0.85)),
        ("evt-doc", "document.uploaded", 1, document_payload(0.9)),
        ("evt-match", "match.completed", 2, match_payload(0.88)),
    ] {
        state
            .dispatcher
            .submit(submission(id, kind, "wf1", ts(offset), payload))
            .await
            .unwrap();
    }

    let wf_id = WorkflowId::new("wf1");
    wait_for_decisions(store.as_ref(), &wf_id, 1).await;

    let (wf, decisions) = store.load(&wf_id).await.unwrap().unwrap();
    assert_eq!(wf.state, WorkflowState::Finalised);
    assert_eq!(decisions.len(), 1);

    let decision = &decisions[0];
    assert_eq!(decision.outcome, Outcome::Approve);
    assert!(!decision.authority.is_override);
    assert_eq!(decision.lineage.supersedes_decision_id, None);
    assert_eq!(decision.cause_event_id, EventId::new("evt-match"));
    // Deterministic id: H(workflow_id, causing event, authority).
    assert_eq!(
        decision.decision_id,
        DecisionId::derive(&wf_id, &EventId::new("evt-match"), AUTHORITY)
    );
    assert_eq!(wf.current_decision_id, Some(decision.decision_id));

    assert_eq!(risk.call_count(), 1);
    assert_eq!(publisher.count(), 1);
}

/// Scenario: an override appends a new decision with lineage; history is
/// preserved and readable in order.
#[tokio::test]
async fn override_creates_superseding_decision_and_preserves_history() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let (state, publisher) = pipeline(store.clone(), StubRisk::low_risk(), &fast_config());
    let wf_id = WorkflowId::new("wf1");

    for (id, kind, offset, payload) in [
        ("evt-selfie", "selfie.uploaded", 0, selfie_payload(0.85)),
        ("evt-doc", "document.uploaded", 1, document_payload(0.9)),
        ("evt-match", "match.completed", 2, match_payload(0.88)),
    ] {
        state
            .dispatcher
            .submit(submission(id, kind, "wf1", ts(offset), payload))
            .await
            .unwrap();
    }
    wait_for_decisions(store.as_ref(), &wf_id, 1).await;

    state
        .dispatcher
        .submit(submission(
            "ovr1",
            "override.applied",
            "wf1",
            ts(10),
            override_payload("decline", "manual review", "inv_007"),
        ))
        .await
        .unwrap();
    wait_for_decisions(store.as_ref(), &wf_id, 2).await;

    let (wf, decisions) = store.load(&wf_id).await.unwrap().unwrap();
    assert_eq!(decisions.len(), 2);

    let original = &decisions[0];
    let overriding = &decisions[1];
    assert_eq!(overriding.outcome, Outcome::Decline);
    assert!(overriding.authority.is_override);
    assert_eq!(
        overriding.authority.actor_id,
        Some(ActorId::new("inv_007"))
    );
    assert_eq!(
        overriding.lineage.supersedes_decision_id,
        Some(original.decision_id)
    );
    assert_eq!(
        overriding.decision_id,
        DecisionId::derive(&wf_id, &EventId::new("ovr1"), AUTHORITY)
    );

    // The override decision is now current; the original is superseded but
    // still readable.
    assert_eq!(wf.current_decision_id, Some(overriding.decision_id));
    assert_eq!(wf.state, WorkflowState::Finalised);
    assert_eq!(publisher.count(), 2);
}

/// Scenario: re-submitting an event with the same event_id acknowledges the
/// duplicate and appends no new decision.
#[tokio::test]
async fn duplicate_event_produces_no_duplicate_decision() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let (state, publisher) = pipeline(store.clone(), StubRisk::low_risk(), &fast_config());
    let wf_id = WorkflowId::new("wf1");

    for (id, kind, offset, payload) in [
        ("evt-selfie", "selfie.uploaded", 0, selfie_payload(0.85)),
        ("evt-doc", "document.uploaded", 1, document_payload(0.9)),
        ("evt-match", "match.completed", 2, match_payload(0.88)),
    ] {
        state
            .dispatcher
            .submit(submission(id, kind, "wf1", ts(offset), payload))
            .await
            .unwrap();
    }
    wait_for_decisions(store.as_ref(), &wf_id, 1).await;
    let (_, before) = store.load(&wf_id).await.unwrap().unwrap();

    let receipt = state
        .dispatcher
        .submit(submission(
            "evt-match",
            "match.completed",
            "wf1",
            ts(2),
            match_payload(0.88),
        ))
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(receipt.status).unwrap(),
        serde_json::json!("duplicate")
    );

    // Give any erroneous reprocessing a chance to land before asserting.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (_, after) = store.load(&wf_id).await.unwrap().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].decision_id, before[0].decision_id);
    assert_eq!(publisher.count(), 1);
}

/// Scenario: two concurrent overrides serialise; the second supersedes the
/// first, not the original.
#[tokio::test]
async fn concurrent_overrides_chain_lineage_in_arrival_order() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let (state, _) = pipeline(store.clone(), StubRisk::low_risk(), &fast_config());
    let wf_id = WorkflowId::new("wf1");

    for (id, kind, offset, payload) in [
        ("evt-selfie", "selfie.uploaded", 0, selfie_payload(0.85)),
        ("evt-doc", "document.uploaded", 1, document_payload(0.9)),
        ("evt-match", "match.completed", 2, match_payload(0.88)),
    ] {
        state
            .dispatcher
            .submit(submission(id, kind, "wf1", ts(offset), payload))
            .await
            .unwrap();
    }
    wait_for_decisions(store.as_ref(), &wf_id, 1).await;

    // Submit both overrides back to back without waiting between them.
    state
        .dispatcher
        .submit(submission(
            "ovrA",
            "override.applied",
            "wf1",
            ts(10),
            override_payload("decline", "fraud signal", "inv_001"),
        ))
        .await
        .unwrap();
    state
        .dispatcher
        .submit(submission(
            "ovrB",
            "override.applied",
            "wf1",
            ts(11),
            override_payload("approve", "cleared on appeal", "inv_002"),
        ))
        .await
        .unwrap();

    wait_for_decisions(store.as_ref(), &wf_id, 3).await;
    let (wf, decisions) = store.load(&wf_id).await.unwrap().unwrap();

    let original = &decisions[0];
    let first_override = &decisions[1];
    let second_override = &decisions[2];

    assert_eq!(
        first_override.lineage.supersedes_decision_id,
        Some(original.decision_id)
    );
    // The second override supersedes the first, not the original.
    assert_eq!(
        second_override.lineage.supersedes_decision_id,
        Some(first_override.decision_id)
    );
    assert_eq!(wf.current_decision_id, Some(second_override.decision_id));
}

/// Scenario: transient risk failures exhaust retries and finalise a single
/// review decision naming the failure mode.
#[tokio::test]
async fn risk_transient_exhaustion_finalises_review() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let risk = StubRisk::always_transient();
    let (state, publisher) = pipeline(store.clone(), risk.clone(), &fast_config());
    let wf_id = WorkflowId::new("wf1");

    for (id, kind, offset, payload) in [
        ("evt-selfie", "selfie.uploaded", 0, selfie_payload(0.85)),
        ("evt-doc", "document.uploaded", 1, document_payload(0.9)),
        ("evt-match", "match.completed", 2, match_payload(0.88)),
    ] {
        state
            .dispatcher
            .submit(submission(id, kind, "wf1", ts(offset), payload))
            .await
            .unwrap();
    }

    wait_for_decisions(store.as_ref(), &wf_id, 1).await;
    let (_, decisions) = store.load(&wf_id).await.unwrap().unwrap();

    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].outcome, Outcome::Review);
    assert!(decisions[0]
        .reason_codes
        .iter()
        .any(|c| c.contains("risk_unavailable_transient")));
    // risk_max_retries = 2: initial call plus two retries.
    assert_eq!(risk.call_count(), 3);
    assert_eq!(publisher.count(), 1);
}

/// Boundary: an override against a workflow with no finalised decision
/// fails and emits nothing.
#[tokio::test]
async fn override_without_prior_decision_emits_nothing() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let (state, publisher) = pipeline(store.clone(), StubRisk::low_risk(), &fast_config());
    let wf_id = WorkflowId::new("wf-fresh");

    state
        .dispatcher
        .submit(submission(
            "ovr-early",
            "override.applied",
            "wf-fresh",
            ts(0),
            override_payload("approve", "vip customer", "inv_009"),
        ))
        .await
        .unwrap();

    // The handler rejects the override; nothing is ever finalised.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let (wf, decisions) = store.load(&wf_id).await.unwrap().unwrap();
    assert_eq!(decisions.len(), 0);
    assert_eq!(wf.state, WorkflowState::Pending);
    assert_eq!(publisher.count(), 0);
}

/// Replay determinism: processing the same event log into an empty store
/// yields byte-identical decision records.
#[tokio::test]
async fn replaying_event_log_reproduces_identical_decisions() {
    async fn run_once() -> Vec<String> {
        let store = Arc::new(MemoryWorkflowStore::new());
        let (state, _) = pipeline(store.clone(), StubRisk::low_risk(), &fast_config());
        let wf_id = WorkflowId::new("wf1");

        for (id, kind, offset, payload) in [
            ("evt-selfie", "selfie.uploaded", 0, selfie_payload(0.85)),
            ("evt-doc", "document.uploaded", 1, document_payload(0.9)),
            ("evt-match", "match.completed", 2, match_payload(0.88)),
        ] {
            state
                .dispatcher
                .submit(submission(id, kind, "wf1", ts(offset), payload))
                .await
                .unwrap();
        }
        wait_for_decisions(store.as_ref(), &wf_id, 1).await;

        state
            .dispatcher
            .submit(submission(
                "ovr1",
                "override.applied",
                "wf1",
                ts(10),
                override_payload("decline", "manual review", "inv_007"),
            ))
            .await
            .unwrap();
        wait_for_decisions(store.as_ref(), &wf_id, 2).await;

        let (_, decisions) = store.load(&wf_id).await.unwrap().unwrap();
        decisions
            .iter()
            .map(|d| serde_json::to_string(d).unwrap())
            .collect()
    }

    let first_run = run_once().await;
    let second_run = run_once().await;

    assert_eq!(first_run.len(), 2);
    // Byte-identical records, including decision ids and timestamps.
    assert_eq!(first_run, second_run);
}
