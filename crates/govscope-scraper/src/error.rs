use std::time::Duration;

use thiserror::Error;

/// One failed request against the upstream API, classified by how the
/// retry loop should treat it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("graphql error: {0}")]
    GraphQl(String),

    #[error("unexpected response shape: {0}")]
    Schema(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed. Client errors and
    /// schema mismatches indicate an upstream contract problem and are
    /// surfaced immediately. Rate limiting is handled separately and is
    /// never a hard failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::Connection(_)
                | FetchError::Server { .. }
                | FetchError::GraphQl(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Connection(e.to_string())
        }
    }
}

/// A page fetch that gave up, with enough position context to diagnose
/// where in the sequence it happened.
#[derive(Debug, Error)]
#[error("page fetch failed after {pages_fetched} page(s) (cursor {cursor:?}): {source}")]
pub struct PageError {
    pub cursor: Option<String>,
    pub pages_fetched: u32,
    #[source]
    pub source: FetchError,
}

pub type FetchResult<T> = Result<T, FetchError>;
