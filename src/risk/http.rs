//! HTTP adapter for the external risk service.
//!
//! Posts the workflow snapshot to `{base_url}/v1/risk/evaluate` and parses
//! the banded result. Failure classification:
//! - connect/IO errors, timeouts, 429 and 5xx responses -> transient
//! - other 4xx responses and malformed bodies -> permanent

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use async_trait::async_trait;

use super::{RiskError, RiskEvaluator, RiskResult, RiskSnapshot};

/// Configuration for the HTTP risk client.
#[derive(Debug, Clone)]
pub struct HttpRiskClientConfig {
    /// Base URL of the risk service, e.g. `http://localhost:8103`.
    pub base_url: String,
    /// Per-call timeout, applied to the whole request/response exchange.
    pub timeout: Duration,
}

impl HttpRiskClientConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

/// HTTP implementation of [`RiskEvaluator`].
pub struct HttpRiskClient {
    client: Client<HttpConnector, Full<Bytes>>,
    config: HttpRiskClientConfig,
}

impl HttpRiskClient {
    pub fn new(config: HttpRiskClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/risk/evaluate", self.config.base_url)
    }

    async fn call(&self, snapshot: &RiskSnapshot) -> Result<RiskResult, RiskError> {
        let body = serde_json::to_vec(snapshot)
            .map_err(|e| RiskError::Permanent(format!("snapshot encode: {e}")))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RiskError::Permanent(format!("request build: {e}")))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RiskError::Transient(format!("risk service unreachable: {e}")))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RiskError::Transient(format!("risk response read: {e}")))?
            .to_bytes();

        if status.is_success() {
            serde_json::from_slice(&bytes)
                .map_err(|e| RiskError::Permanent(format!("risk response schema: {e}")))
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(RiskError::Transient(format!(
                "risk service returned {status}"
            )))
        } else {
            Err(RiskError::Permanent(format!(
                "risk service rejected request: {status}"
            )))
        }
    }
}

#[async_trait]
impl RiskEvaluator for HttpRiskClient {
    async fn evaluate(&self, snapshot: &RiskSnapshot) -> Result<RiskResult, RiskError> {
        match tokio::time::timeout(self.config.timeout, self.call(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(RiskError::Transient(format!(
                "risk call exceeded {}ms",
                self.config.timeout.as_millis()
            ))),
        }
    }
}
