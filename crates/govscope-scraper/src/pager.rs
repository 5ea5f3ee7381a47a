//! Cursor pagination with page-level retries.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{FetchError, PageError};
use crate::tally::queries::PagedQuery;
use crate::tally::GraphqlTransport;

/// Retry tuning for a single request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(5),
            rate_limit_cooldown: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Runs one GraphQL request under the retry rules: transient failures
    /// back off exponentially up to the attempt bound, while a 429 waits
    /// out the server-indicated cooldown without consuming an attempt.
    pub async fn execute(
        &self,
        transport: &dyn GraphqlTransport,
        document: &'static str,
        variables: Value,
    ) -> Result<Value, FetchError> {
        let mut attempt = 0u32;
        loop {
            match transport.execute(document, variables.clone()).await {
                Ok(data) => return Ok(data),
                Err(FetchError::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or(self.rate_limit_cooldown);
                    tracing::warn!(
                        wait_ms = %wait.as_millis(),
                        "rate limited, waiting out the cooldown"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        "transient fetch error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

/// A lazy pull over one query's pages. Each `next_page` call issues at
/// most one (retried) request; the sequence ends when the server stops
/// returning items or the cursor stops advancing. A fresh pager always
/// restarts from the first page - cursors are not resumable across
/// instances.
pub struct Pager<Q: PagedQuery> {
    transport: Arc<dyn GraphqlTransport>,
    query: Q,
    page_size: u32,
    max_pages: u32,
    retry: RetryPolicy,
    cursor: Option<String>,
    pages_fetched: u32,
    done: bool,
}

impl<Q: PagedQuery> Pager<Q> {
    pub fn new(
        transport: Arc<dyn GraphqlTransport>,
        query: Q,
        page_size: u32,
        max_pages: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            query,
            page_size,
            max_pages,
            retry,
            cursor: None,
            pages_fetched: 0,
            done: false,
        }
    }

    /// Pulls the next page of items. `Ok(None)` means the sequence is
    /// exhausted and stays exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Q::Item>>, PageError> {
        if self.done {
            return Ok(None);
        }
        if self.pages_fetched >= self.max_pages {
            tracing::warn!(pages = %self.pages_fetched, "page bound reached, stopping pagination");
            self.done = true;
            return Ok(None);
        }

        let variables = self.query.variables(self.cursor.as_deref(), self.page_size);
        let data = self
            .retry
            .execute(self.transport.as_ref(), self.query.document(), variables)
            .await
            .map_err(|source| self.page_error(source))?;
        let page = self
            .query
            .extract(data)
            .map_err(|source| self.page_error(source))?;
        self.pages_fetched += 1;

        // An empty page ends the sequence even when a cursor came back;
        // some endpoints keep echoing a cursor past the last row.
        if page.items.is_empty() {
            self.done = true;
            return Ok(None);
        }
        match page.next_cursor {
            Some(next) if self.cursor.as_deref() != Some(next.as_str()) => {
                self.cursor = Some(next);
            }
            _ => self.done = true,
        }

        Ok(Some(page.items))
    }

    /// Drains the whole sequence into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<Q::Item>, PageError> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page);
        }
        Ok(items)
    }

    fn page_error(&self, source: FetchError) -> PageError {
        PageError {
            cursor: self.cursor.clone(),
            pages_fetched: self.pages_fetched,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::queries::VotesByProposal;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value, FetchError>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<Value, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GraphqlTransport for ScriptedTransport {
        async fn execute(&self, _document: &'static str, _variables: Value) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Schema("script exhausted".into())))
        }
    }

    fn vote_node(address: &str, id: &str) -> Value {
        json!({
            "id": id,
            "type": "for",
            "amount": "10",
            "voter": { "address": address },
            "block": { "timestamp": "2023-01-01T00:00:00Z" }
        })
    }

    fn votes_page(nodes: Vec<Value>, cursor: Option<&str>) -> Value {
        json!({
            "votes": {
                "nodes": nodes,
                "pageInfo": { "lastCursor": cursor }
            }
        })
    }

    fn pager(transport: Arc<ScriptedTransport>, retry: RetryPolicy) -> Pager<VotesByProposal> {
        Pager::new(
            transport,
            VotesByProposal {
                proposal_id: "p1".into(),
            },
            100,
            1000,
            retry,
        )
    }

    #[tokio::test]
    async fn terminates_on_empty_page_despite_cursor() {
        let transport = ScriptedTransport::new(vec![
            Ok(votes_page(
                vec![vote_node("0xaa", "1"), vote_node("0xbb", "2")],
                Some("cur-1"),
            )),
            Ok(votes_page(vec![], Some("cur-2"))),
        ]);
        let items = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn terminates_when_cursor_does_not_advance() {
        let transport = ScriptedTransport::new(vec![
            Ok(votes_page(vec![vote_node("0xaa", "1")], Some("cur-1"))),
            Ok(votes_page(vec![vote_node("0xbb", "2")], Some("cur-1"))),
        ]);
        let items = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn terminates_when_cursor_is_exhausted() {
        let transport = ScriptedTransport::new(vec![Ok(votes_page(
            vec![vote_node("0xaa", "1")],
            None,
        ))]);
        let items = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_backoff() {
        let transport = ScriptedTransport::new(vec![
            Err(FetchError::Server {
                status: 503,
                body: "unavailable".into(),
            }),
            Err(FetchError::Timeout),
            Ok(votes_page(vec![vote_node("0xaa", "1")], None)),
        ]);
        let items = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_surfaces_the_last_error() {
        let server_error = || {
            Err(FetchError::Server {
                status: 500,
                body: "boom".into(),
            })
        };
        let transport =
            ScriptedTransport::new(vec![server_error(), server_error(), server_error()]);
        let err = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 3);
        assert!(matches!(err.source, FetchError::Server { status: 500, .. }));
        assert_eq!(err.pages_fetched, 0);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(FetchError::Client {
            status: 400,
            body: "bad request".into(),
        })]);
        let err = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert!(matches!(err.source, FetchError::Client { .. }));
    }

    #[tokio::test]
    async fn schema_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(json!({ "unexpected": {} }))]);
        let err = pager(transport.clone(), RetryPolicy::default())
            .collect_all()
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert!(matches!(err.source, FetchError::Schema(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_do_not_consume_attempts() {
        // max_attempts = 1 leaves no room for transient retries, yet the
        // 429s must still be waited out and the page completed intact.
        let retry = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let transport = ScriptedTransport::new(vec![
            Ok(votes_page(vec![vote_node("0xaa", "1")], Some("cur-1"))),
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Err(FetchError::RateLimited { retry_after: None }),
            Ok(votes_page(vec![vote_node("0xbb", "2")], None)),
        ]);
        let items = pager(transport.clone(), retry).collect_all().await.unwrap();

        assert_eq!(transport.calls(), 4);
        let addresses: Vec<&str> = items.iter().map(|r| r.delegate.as_str()).collect();
        assert_eq!(addresses, vec!["0xaa", "0xbb"]);
    }

    #[tokio::test]
    async fn page_bound_stops_pagination() {
        let endless = |i: u32| {
            Ok(votes_page(
                vec![vote_node("0xaa", &i.to_string())],
                Some(&format!("cur-{}", i)),
            ))
        };
        let transport = ScriptedTransport::new((0..10).map(endless).collect());
        let mut pager = Pager::new(
            transport.clone(),
            VotesByProposal {
                proposal_id: "p1".into(),
            },
            100,
            3,
            RetryPolicy::default(),
        );

        let mut total = 0;
        while let Some(page) = pager.next_page().await.unwrap() {
            total += page.len();
        }
        assert_eq!(total, 3);
        assert_eq!(transport.calls(), 3);
    }
}
