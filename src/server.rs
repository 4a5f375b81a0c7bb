//! HTTP server bootstrap.
//!
//! Wires together configuration, the workflow store, the risk client, the
//! decision authority, the per-workflow serializer, and the Axum router.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::{OrchestratorConfig, PublishMode, TransientFallback};
use crate::dispatch::IngressDispatcher;
use crate::domain::{Jurisdiction, TenantId};
use crate::engine::{
    AuthorityIdentity, DecisionAuthority, WorkflowEventHandler, WorkflowSerializer,
};
use crate::infra::{
    BufferedPublisher, DecisionPublisher, LogPublisher, SqliteWorkflowStore, WorkflowFilter,
    WorkflowStore,
};
use crate::policy::PolicyRegistry;
use crate::risk::{HttpRiskClient, HttpRiskClientConfig};

/// Bootstrap failures, mapped to distinct exit codes by the binary.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store unreachable: {0}")]
    Store(String),
    #[error("server error: {0}")]
    Io(String),
}

impl ServerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ServerError::Config(_) => 2,
            ServerError::Store(_) => 3,
            ServerError::Io(_) => 1,
        }
    }
}

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub risk_url: String,
    pub engine: OrchestratorConfig,
    pub default_jurisdiction: Jurisdiction,
    /// `tenant=JURISDICTION` pairs, comma separated.
    pub tenant_jurisdictions: Vec<(TenantId, Jurisdiction)>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:decision_orchestrator.db?mode=rwc".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_parse("PORT", 8102)?;
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid listen address: {e}")))?;

        let risk_url =
            std::env::var("RISK_URL").unwrap_or_else(|_| "http://localhost:8103".to_string());

        let mut engine = OrchestratorConfig::default();
        engine.serializer.worker_cap = env_parse("WORKER_CAP", engine.serializer.worker_cap)?;
        engine.serializer.per_workflow_queue_depth = env_parse(
            "PER_WORKFLOW_QUEUE_DEPTH",
            engine.serializer.per_workflow_queue_depth,
        )?;
        engine.serializer.actor_idle_ttl =
            Duration::from_secs(env_parse("ACTOR_IDLE_TTL_SECS", 30u64)?);
        engine.serializer.event_handler_deadline =
            Duration::from_secs(env_parse("EVENT_HANDLER_DEADLINE_SECS", 30u64)?);
        engine.serializer.max_delivery_attempts = env_parse(
            "MAX_DELIVERY_ATTEMPTS",
            engine.serializer.max_delivery_attempts,
        )?;

        engine.risk.risk_timeout = Duration::from_secs(env_parse("RISK_TIMEOUT_SECS", 5u64)?);
        engine.risk.risk_max_retries =
            env_parse("RISK_MAX_RETRIES", engine.risk.risk_max_retries)?;
        engine.risk.risk_backoff_base =
            Duration::from_millis(env_parse("RISK_BACKOFF_BASE_MS", 200u64)?);
        engine.risk.risk_backoff_cap =
            Duration::from_millis(env_parse("RISK_BACKOFF_CAP_MS", 5000u64)?);
        engine.risk.transient_fallback =
            match std::env::var("RISK_TRANSIENT_FALLBACK").as_deref() {
                Ok("retain") => TransientFallback::Retain,
                Ok("review") | Err(_) => TransientFallback::Review,
                Ok(other) => {
                    return Err(ServerError::Config(format!(
                        "RISK_TRANSIENT_FALLBACK must be review or retain, got {other:?}"
                    )))
                }
            };

        engine.publish_mode = match std::env::var("OUTBOUND_PUBLISH_MODE").as_deref() {
            Ok("async_with_buffer") => PublishMode::AsyncWithBuffer {
                buffer: env_parse("OUTBOUND_BUFFER", 256usize)?,
            },
            Ok("sync") | Err(_) => PublishMode::Sync,
            Ok(other) => {
                return Err(ServerError::Config(format!(
                    "OUTBOUND_PUBLISH_MODE must be sync or async_with_buffer, got {other:?}"
                )))
            }
        };

        let default_jurisdiction = Jurisdiction::new(
            std::env::var("DEFAULT_JURISDICTION").unwrap_or_else(|_| "AU".to_string()),
        );

        let tenant_jurisdictions = match std::env::var("TENANT_JURISDICTIONS") {
            Ok(raw) => parse_tenant_jurisdictions(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            database_url,
            listen_addr,
            risk_url,
            engine,
            default_jurisdiction,
            tenant_jurisdictions,
        })
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ServerError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn parse_tenant_jurisdictions(raw: &str) -> Result<Vec<(TenantId, Jurisdiction)>, ServerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(tenant, jurisdiction)| {
                    (TenantId::new(tenant), Jurisdiction::new(jurisdiction))
                })
                .ok_or_else(|| {
                    ServerError::Config(format!(
                        "TENANT_JURISDICTIONS entries must be tenant=JURISDICTION, got {pair:?}"
                    ))
                })
        })
        .collect()
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<IngressDispatcher>,
    pub store: Arc<dyn WorkflowStore>,
}

/// Assemble the pipeline around a store and risk evaluator.
///
/// Split out from [`run`] so tests can build the exact production wiring
/// against in-memory collaborators.
pub fn build_pipeline(
    store: Arc<dyn WorkflowStore>,
    risk: Arc<dyn crate::risk::RiskEvaluator>,
    publisher: Arc<dyn DecisionPublisher>,
    policies: Arc<PolicyRegistry>,
    config: &OrchestratorConfig,
) -> AppState {
    let publisher: Arc<dyn DecisionPublisher> = match config.publish_mode {
        PublishMode::Sync => publisher,
        PublishMode::AsyncWithBuffer { buffer } => {
            Arc::new(BufferedPublisher::spawn(publisher, buffer))
        }
    };

    let authority = Arc::new(DecisionAuthority::new(
        store.clone(),
        publisher,
        policies.clone(),
        AuthorityIdentity::default(),
    ));

    let handler = Arc::new(WorkflowEventHandler::new(
        store.clone(),
        risk,
        authority,
        policies,
        config.risk.clone(),
    ));

    let serializer = WorkflowSerializer::new(handler, store.clone(), config.serializer.clone());
    let dispatcher = Arc::new(IngressDispatcher::new(store.clone(), serializer));

    AppState { dispatcher, store }
}

/// Build the full router with health probes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", crate::api::router())
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn run() -> Result<(), ServerError> {
    init_tracing();

    info!(
        "Starting decision orchestrator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Risk service: {}", config.risk_url);
    info!("  Worker cap: {}", config.engine.serializer.worker_cap);

    let store = SqliteWorkflowStore::connect(&config.database_url)
        .await
        .map_err(|e| ServerError::Store(e.to_string()))?;
    info!("Workflow store ready");

    let mut policies = PolicyRegistry::with_defaults();
    policies.set_default_jurisdiction(config.default_jurisdiction.clone());
    for (tenant, jurisdiction) in &config.tenant_jurisdictions {
        policies.route_tenant(tenant.clone(), jurisdiction.clone());
    }

    let risk = Arc::new(HttpRiskClient::new(HttpRiskClientConfig::new(
        config.risk_url.clone(),
        config.engine.risk.risk_timeout,
    )));

    let state = build_pipeline(
        Arc::new(store),
        risk,
        Arc::new(LogPublisher),
        Arc::new(policies),
        &config.engine,
    );

    let app = build_router(state);

    info!("Listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| ServerError::Io(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Io(e.to_string()))?;

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "decision-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check endpoint; probes the store with a bounded read.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    let probe = WorkflowFilter {
        limit: Some(1),
        ..Default::default()
    };
    match state.store.list_workflows(&probe).await {
        Ok(_) => Ok(axum::Json(serde_json::json!({
            "status": "ready",
            "store": "connected",
        }))),
        Err(e) => Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("store unavailable: {e}"),
        )),
    }
}
