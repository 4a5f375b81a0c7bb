//! REST endpoints for event ingestion and investigator queries.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::types::{
    ListWorkflowsQuery, ListWorkflowsResponse, SubmitEventResponse, TimelineEntry,
    TimelineResponse, WorkflowSummary,
};
use crate::dispatch::IngressStatus;
use crate::domain::{EventSubmission, TenantId, WorkflowId, WorkflowState};
use crate::infra::{OrchestratorError, WorkflowFilter};
use crate::server::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/events", post(submit_event))
        .route("/v1/workflows", get(list_workflows))
        .route("/v1/workflows/:workflow_id/current", get(get_current))
        .route("/v1/workflows/:workflow_id/decisions", get(get_timeline))
}

/// POST /api/v1/events - ingest an event envelope.
///
/// `accepted` acknowledges enqueueing, not processing; read the timeline or
/// subscribe to the outbound log for the outcome.
async fn submit_event(
    State(state): State<AppState>,
    Json(submission): Json<EventSubmission>,
) -> (StatusCode, Json<SubmitEventResponse>) {
    let submitted_id = submission.event_id.clone();

    match state.dispatcher.submit(submission).await {
        Ok(receipt) => {
            let status = match receipt.status {
                IngressStatus::Accepted => "accepted",
                IngressStatus::Duplicate => "duplicate",
            };
            (
                StatusCode::ACCEPTED,
                Json(SubmitEventResponse {
                    status: status.to_string(),
                    event_id: Some(receipt.event_id.as_str().to_string()),
                    error: None,
                }),
            )
        }
        Err(e @ OrchestratorError::Backpressure { .. }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(SubmitEventResponse {
                status: "backpressure".to_string(),
                event_id: submitted_id,
                error: Some(e.to_string()),
            }),
        ),
        Err(
            e @ (OrchestratorError::MalformedEvent(_) | OrchestratorError::UnknownEventType(_)),
        ) => (
            StatusCode::BAD_REQUEST,
            Json(SubmitEventResponse {
                status: "invalid".to_string(),
                event_id: submitted_id,
                error: Some(e.to_string()),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SubmitEventResponse {
                status: "unavailable".to_string(),
                event_id: submitted_id,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// GET /api/v1/workflows/{workflow_id}/current - the authoritative decision.
async fn get_current(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let workflow_id = WorkflowId::new(workflow_id);
    let loaded = state
        .store
        .load(&workflow_id)
        .await
        .map_err(internal_error)?;

    let Some((workflow, decisions)) = loaded else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("workflow not found: {workflow_id}"),
        ));
    };

    let current = workflow.current_decision_id.and_then(|current_id| {
        decisions
            .into_iter()
            .find(|d| d.decision_id == current_id)
    });

    match current {
        Some(decision) => Ok(Json(
            serde_json::to_value(&decision).map_err(|e| internal_error(e.into()))?,
        )),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("no current decision for workflow {workflow_id}"),
        )),
    }
}

/// GET /api/v1/workflows/{workflow_id}/decisions - the full timeline in
/// append order, annotated with lineage.
async fn get_timeline(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<TimelineResponse>, (StatusCode, String)> {
    let workflow_id = WorkflowId::new(workflow_id);
    let loaded = state
        .store
        .load(&workflow_id)
        .await
        .map_err(internal_error)?;

    let Some((workflow, decisions)) = loaded else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("workflow not found: {workflow_id}"),
        ));
    };

    let current_id = workflow.current_decision_id;
    let entries: Vec<TimelineEntry> = decisions
        .into_iter()
        .map(|decision| TimelineEntry {
            is_current: Some(decision.decision_id) == current_id,
            decision,
        })
        .collect();

    Ok(Json(TimelineResponse {
        workflow_id: workflow_id.as_str().to_string(),
        count: entries.len(),
        decisions: entries,
    }))
}

/// GET /api/v1/workflows - investigator listing with filters.
async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ListWorkflowsResponse>, (StatusCode, String)> {
    let state_filter = match query.state.as_deref() {
        Some(raw) => Some(WorkflowState::parse(raw).ok_or((
            StatusCode::BAD_REQUEST,
            format!("unrecognised state filter: {raw}"),
        ))?),
        None => None,
    };

    let filter = WorkflowFilter {
        tenant_id: query.tenant_id.map(TenantId::new),
        state: state_filter,
        created_after: query.created_after,
        created_before: query.created_before,
        limit: query.limit,
    };

    let workflows = state
        .store
        .list_workflows(&filter)
        .await
        .map_err(internal_error)?;

    Ok(Json(ListWorkflowsResponse {
        count: workflows.len(),
        workflows: workflows.iter().map(WorkflowSummary::from).collect(),
    }))
}

fn internal_error(e: OrchestratorError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
