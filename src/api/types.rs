//! Request/response DTOs for the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DecisionRecord, WorkflowRecord};

/// Response for `POST /v1/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEventResponse {
    /// accepted | duplicate | backpressure | invalid
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decision in the investigator timeline, annotated with its place in the
/// override lineage.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    #[serde(flatten)]
    pub decision: DecisionRecord,
    pub is_current: bool,
}

/// Response for `GET /v1/workflows/{id}/decisions`.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineResponse {
    pub workflow_id: String,
    pub count: usize,
    pub decisions: Vec<TimelineEntry>,
}

/// Workflow summary for investigator listings.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub tenant_id: String,
    pub state: String,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_decision_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowRecord> for WorkflowSummary {
    fn from(wf: &WorkflowRecord) -> Self {
        Self {
            workflow_id: wf.workflow_id.as_str().to_string(),
            tenant_id: wf.tenant_id.as_str().to_string(),
            state: wf.state.as_str().to_string(),
            version: wf.version,
            current_decision_id: wf.current_decision_id.map(|d| d.to_hex()),
            created_at: wf.created_at,
            updated_at: wf.updated_at,
        }
    }
}

/// Query parameters for `GET /v1/workflows`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListWorkflowsQuery {
    pub tenant_id: Option<String>,
    pub state: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Response for `GET /v1/workflows`.
#[derive(Debug, Clone, Serialize)]
pub struct ListWorkflowsResponse {
    pub count: usize,
    pub workflows: Vec<WorkflowSummary>,
}
