//! Tally API client
//!
//! One GraphQL endpoint serves everything this tool needs; the transport
//! trait below is the only seam the fetch pipeline sees, so tests swap in
//! a scripted implementation.

pub mod queries;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::TallyConfig;
use crate::error::{FetchError, FetchResult};
use crate::limiter::RateLimiter;

/// Runs one GraphQL document with variables and hands back the `data`
/// payload. Implementations classify failures into [`FetchError`]s so the
/// retry layer can tell transient conditions from contract breaks.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn execute(&self, document: &'static str, variables: Value) -> FetchResult<Value>;
}

pub struct TallyClient {
    client: Client,
    endpoint: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl TallyClient {
    pub fn new(config: &TallyConfig, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("govscope/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            limiter,
        })
    }
}

#[async_trait]
impl GraphqlTransport for TallyClient {
    async fn execute(&self, document: &'static str, variables: Value) -> FetchResult<Value> {
        self.limiter.acquire().await;

        let start = Instant::now();
        let payload = json!({ "query": document, "variables": variables });
        let response = self
            .client
            .post(&self.endpoint)
            .header("Api-Key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            tracing::warn!(retry_after = ?retry_after, "Tally API rate limited the request");
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %truncate(&body), "Tally API error");
            return Err(if status.is_server_error() {
                FetchError::Server {
                    status: status.as_u16(),
                    body: truncate(&body),
                }
            } else {
                FetchError::Client {
                    status: status.as_u16(),
                    body: truncate(&body),
                }
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Schema(format!("response is not JSON: {}", e)))?;

        if let Some(errors) = body.get("errors") {
            if errors.as_array().is_some_and(|a| !a.is_empty()) {
                tracing::warn!(errors = %errors, "Tally API returned GraphQL errors");
                return Err(FetchError::GraphQl(errors.to_string()));
            }
        }

        tracing::debug!(
            duration_ms = %start.elapsed().as_millis(),
            "Tally API request completed"
        );

        body.get("data")
            .filter(|d| !d.is_null())
            .cloned()
            .ok_or_else(|| FetchError::Schema("response missing data field".into()))
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}
