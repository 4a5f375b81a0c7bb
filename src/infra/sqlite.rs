//! SQLite-backed workflow store.
//!
//! The durable implementation of the store contract. Rows store the typed
//! records as JSON; decision rows are written once and never updated, with a
//! uniqueness constraint on `decision_id` providing the single-emitter
//! foundation. Optimistic concurrency is a compare-and-swap on the workflow
//! `version` column inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::domain::{
    DecisionId, DecisionRecord, EventEnvelope, EventId, SignalMap, TenantId, WorkflowId,
    WorkflowMutation, WorkflowRecord, WorkflowState,
};

use super::{
    AppendOutcome, OrchestratorError, RecordOutcome, Result, WorkflowFilter, WorkflowStore,
};

/// SQLite-based implementation of [`WorkflowStore`].
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database path or URL and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory database on a single connection; used by tests and local
    /// runs. A shared pool would give each connection its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))
    }

    /// Connectivity probe for the readiness endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowRecord> {
        let signals_json: String = row.try_get("signals")?;
        let signals: SignalMap = serde_json::from_str(&signals_json)?;

        let state_str: String = row.try_get("state")?;
        let state = WorkflowState::parse(&state_str).ok_or_else(|| {
            OrchestratorError::Internal(format!("unrecognised workflow state {state_str:?}"))
        })?;

        let current: Option<String> = row.try_get("current_decision_id")?;
        let current_decision_id = match current {
            Some(hex) => Some(DecisionId::from_hex(&hex).ok_or_else(|| {
                OrchestratorError::Internal(format!("unparseable decision id {hex:?}"))
            })?),
            None => None,
        };

        let version: i64 = row.try_get("version")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(WorkflowRecord {
            workflow_id: WorkflowId::new(row.try_get::<String, _>("workflow_id")?),
            tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
            state,
            signals,
            current_decision_id,
            version: version as u64,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: parse_rfc3339(&updated_at)?,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OrchestratorError::Internal(format!("bad stored timestamp {s:?}: {e}")))
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn record_event(&self, event: &EventEnvelope) -> Result<RecordOutcome> {
        let envelope_json = serde_json::to_string(event)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO workflow_events (
                event_id, workflow_id, tenant_id, event_type,
                envelope, status, recorded_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(event.event_id.as_str())
        .bind(event.workflow_id.as_str())
        .bind(event.tenant_id.as_str())
        .bind(event.kind().as_str())
        .bind(&envelope_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(RecordOutcome::New);
        }

        let status: String =
            sqlx::query_scalar("SELECT status FROM workflow_events WHERE event_id = ?")
                .bind(event.event_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(RecordOutcome::Duplicate {
            processed: status == "processed",
        })
    }

    async fn mark_event_processed(&self, event_id: &EventId) -> Result<()> {
        sqlx::query("UPDATE workflow_events SET status = 'processed' WHERE event_id = ?")
            .bind(event_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_event_failed(&self, event_id: &EventId, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_events SET status = 'failed', failure_reason = ? WHERE event_id = ?",
        )
        .bind(reason)
        .bind(event_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<(WorkflowRecord, Vec<DecisionRecord>)>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let workflow = Self::row_to_workflow(&row)?;

        let decision_rows =
            sqlx::query("SELECT record FROM decisions WHERE workflow_id = ? ORDER BY seq ASC")
                .bind(workflow_id.as_str())
                .fetch_all(&self.pool)
                .await?;

        let mut decisions = Vec::with_capacity(decision_rows.len());
        for row in decision_rows {
            let record_json: String = row.try_get("record")?;
            decisions.push(serde_json::from_str(&record_json)?);
        }

        Ok(Some((workflow, decisions)))
    }

    async fn create_if_absent(
        &self,
        workflow_id: &WorkflowId,
        tenant_id: &TenantId,
    ) -> Result<WorkflowRecord> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO workflows (
                workflow_id, tenant_id, state, signals, version, created_at, updated_at
            ) VALUES (?, ?, 'pending', '{}', 0, ?, ?)
            "#,
        )
        .bind(workflow_id.as_str())
        .bind(tenant_id.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_workflow(&row)
    }

    async fn apply(
        &self,
        workflow_id: &WorkflowId,
        expected_version: u64,
        mutation: WorkflowMutation,
    ) -> Result<WorkflowRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.clone()))?;
        let mut workflow = Self::row_to_workflow(&row)?;

        if workflow.version != expected_version {
            return Err(OrchestratorError::StaleVersion {
                workflow_id: workflow_id.clone(),
                expected: expected_version,
            });
        }

        if let Some(state) = mutation.state {
            workflow.state = state;
        }
        workflow.signals.merge(&mutation.signal_updates);
        workflow.version += 1;
        workflow.updated_at = Utc::now();

        let updated = sqlx::query(
            r#"
            UPDATE workflows
            SET state = ?, signals = ?, version = ?, updated_at = ?
            WHERE workflow_id = ? AND version = ?
            "#,
        )
        .bind(workflow.state.as_str())
        .bind(serde_json::to_string(&workflow.signals)?)
        .bind(workflow.version as i64)
        .bind(workflow.updated_at.to_rfc3339())
        .bind(workflow_id.as_str())
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(OrchestratorError::StaleVersion {
                workflow_id: workflow_id.clone(),
                expected: expected_version,
            });
        }

        tx.commit().await?;
        Ok(workflow)
    }

    async fn append_decision(
        &self,
        workflow_id: &WorkflowId,
        expected_version: u64,
        decision: DecisionRecord,
    ) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        let record_json = serde_json::to_string(&decision)?;
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO decisions (decision_id, workflow_id, record, appended_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(decision.decision_id.to_hex())
        .bind(workflow_id.as_str())
        .bind(&record_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Exactly one caller observes the insert; everyone else reads the
            // already-stored record back.
            let existing: String =
                sqlx::query_scalar("SELECT record FROM decisions WHERE decision_id = ?")
                    .bind(decision.decision_id.to_hex())
                    .fetch_one(&mut *tx)
                    .await?;
            tx.commit().await?;
            return Ok(AppendOutcome::Duplicate(serde_json::from_str(&existing)?));
        }

        let updated = sqlx::query(
            r#"
            UPDATE workflows
            SET current_decision_id = ?, state = 'finalised',
                version = version + 1, updated_at = ?
            WHERE workflow_id = ? AND version = ?
            "#,
        )
        .bind(decision.decision_id.to_hex())
        .bind(Utc::now().to_rfc3339())
        .bind(workflow_id.as_str())
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Rolls back the decision insert as well.
            return Err(OrchestratorError::StaleVersion {
                workflow_id: workflow_id.clone(),
                expected: expected_version,
            });
        }

        tx.commit().await?;
        Ok(AppendOutcome::Appended(decision))
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<WorkflowRecord>> {
        let mut sql = String::from("SELECT * FROM workflows WHERE 1=1");
        if filter.tenant_id.is_some() {
            sql.push_str(" AND tenant_id = ?");
        }
        if filter.state.is_some() {
            sql.push_str(" AND state = ?");
        }
        if filter.created_after.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.created_before.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(tenant) = &filter.tenant_id {
            query = query.bind(tenant.as_str().to_string());
        }
        if let Some(state) = filter.state {
            query = query.bind(state.as_str());
        }
        if let Some(after) = filter.created_after {
            query = query.bind(after.to_rfc3339());
        }
        if let Some(before) = filter.created_before {
            query = query.bind(before.to_rfc3339());
        }
        query = query.bind(filter.limit.unwrap_or(100) as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_workflow).collect()
    }
}
