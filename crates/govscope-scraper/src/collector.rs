//! Vote collection across the proposal set.
//!
//! Proposals fan out over a bounded worker pool; pagination inside one
//! proposal stays sequential because each page depends on the previous
//! cursor. Workers return their own record batches and the merge runs
//! single-threaded afterwards, so nothing but the rate limiter is shared
//! mutable state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use govscope_core::{canonical_address, Delegate, Proposal, VoteRecord};

use crate::pager::{Pager, RetryPolicy};
use crate::tally::queries::VotesByProposal;
use crate::tally::GraphqlTransport;

/// A proposal whose votes could not be fully retrieved, with the last
/// error seen. Surfaced to the user instead of aborting the run.
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub proposal_id: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct CollectedVotes {
    pub records: Vec<VoteRecord>,
    pub failures: Vec<FetchFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub workers: usize,
    pub page_size: u32,
    pub max_pages: u32,
    pub retry: RetryPolicy,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            page_size: 200,
            max_pages: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

enum ProposalOutcome {
    Complete { records: Vec<VoteRecord> },
    Interrupted { records: Vec<VoteRecord> },
    Failed { reason: String },
}

pub struct VoteCollector {
    transport: Arc<dyn GraphqlTransport>,
    settings: CollectorSettings,
}

impl VoteCollector {
    pub fn new(transport: Arc<dyn GraphqlTransport>, settings: CollectorSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Fetches votes for every proposal and merges them into one
    /// deduplicated record set, keeping only votes cast by accounts in the
    /// delegate set.
    ///
    /// Revotes collapse to the latest `cast_at`; when two records carry
    /// the same timestamp the one merged later wins, which is stable only
    /// within a single run's schedule. Proposals that fail all retries are
    /// reported in `failures` and the run continues; cancellation keeps
    /// whatever pages were already fetched and marks interrupted and
    /// never-started proposals as failures too, so consumers never mistake
    /// them for complete.
    pub async fn collect(
        &self,
        proposals: &[Proposal],
        delegates: &[Delegate],
        cancel: CancellationToken,
    ) -> anyhow::Result<CollectedVotes> {
        let delegate_set: HashSet<String> = delegates
            .iter()
            .map(|d| canonical_address(&d.address))
            .collect();

        let sem = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut handles = Vec::with_capacity(proposals.len());
        let mut failures = Vec::new();

        for (index, proposal) in proposals.iter().enumerate() {
            let permit = sem.clone().acquire_owned().await?;
            if cancel.is_cancelled() {
                // Proposals that never started are listed too; a zero-vote
                // summary row must not pass for a fetched-empty proposal.
                for skipped in &proposals[index..] {
                    failures.push(FetchFailure {
                        proposal_id: skipped.id.clone(),
                        reason: "cancelled before fetch started".into(),
                    });
                }
                break;
            }
            let transport = self.transport.clone();
            let settings = self.settings.clone();
            let cancel = cancel.clone();
            let proposal_id = proposal.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                fetch_proposal_votes(transport, settings, proposal_id, cancel).await
            });
            handles.push((proposal.id.clone(), handle));
        }

        let mut merged: HashMap<(String, String), VoteRecord> = HashMap::new();
        let mut dropped_non_delegates = 0usize;

        for (proposal_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ProposalOutcome::Failed {
                    reason: format!("worker task failed: {}", e),
                },
            };
            let records = match outcome {
                ProposalOutcome::Complete { records } => records,
                ProposalOutcome::Interrupted { records } => {
                    failures.push(FetchFailure {
                        proposal_id: proposal_id.clone(),
                        reason: "cancelled before completion; records are partial".into(),
                    });
                    records
                }
                ProposalOutcome::Failed { reason } => {
                    failures.push(FetchFailure {
                        proposal_id,
                        reason,
                    });
                    continue;
                }
            };

            for record in records {
                if !delegate_set.contains(&record.delegate) {
                    dropped_non_delegates += 1;
                    continue;
                }
                let key = (record.delegate.clone(), record.proposal.clone());
                match merged.get(&key) {
                    // An older record never displaces a newer one; a tie
                    // goes to the record seen later.
                    Some(existing) if existing.cast_at > record.cast_at => {}
                    _ => {
                        merged.insert(key, record);
                    }
                }
            }
        }

        if dropped_non_delegates > 0 {
            tracing::debug!(
                count = %dropped_non_delegates,
                "dropped votes cast by accounts outside the delegate set"
            );
        }

        Ok(CollectedVotes {
            records: merged.into_values().collect(),
            failures,
            cancelled: cancel.is_cancelled(),
        })
    }
}

async fn fetch_proposal_votes(
    transport: Arc<dyn GraphqlTransport>,
    settings: CollectorSettings,
    proposal_id: String,
    cancel: CancellationToken,
) -> ProposalOutcome {
    let query = VotesByProposal {
        proposal_id: proposal_id.clone(),
    };
    let mut pager = Pager::new(
        transport,
        query,
        settings.page_size,
        settings.max_pages,
        settings.retry,
    );

    let mut records = Vec::new();
    loop {
        if cancel.is_cancelled() {
            tracing::info!(
                proposal = %proposal_id,
                records_kept = %records.len(),
                "cancelled mid-fetch, keeping already-fetched pages"
            );
            return ProposalOutcome::Interrupted { records };
        }
        match pager.next_page().await {
            Ok(Some(page)) => records.extend(page),
            Ok(None) => {
                tracing::debug!(
                    proposal = %proposal_id,
                    records = %records.len(),
                    "proposal votes fetched"
                );
                return ProposalOutcome::Complete { records };
            }
            Err(e) => {
                tracing::warn!(
                    proposal = %proposal_id,
                    error = %e,
                    "skipping proposal after fetch failure"
                );
                return ProposalOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }
    }
}
