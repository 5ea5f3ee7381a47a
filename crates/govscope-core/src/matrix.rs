//! Voting-matrix aggregation.
//!
//! A pure fold from the deduplicated vote records plus the known delegate
//! and proposal sets into the three report tables. No I/O; output ordering
//! is imposed here so results are reproducible regardless of how the
//! records arrived.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{MatrixError, MatrixResult};
use crate::models::{
    Delegate, DelegateSummary, Proposal, ProposalSummary, VoteChoice, VoteRecord,
};

#[derive(Debug, Clone, Serialize)]
pub struct MatrixReport {
    pub vote_log: Vec<VoteRecord>,
    pub delegate_summaries: Vec<DelegateSummary>,
    pub proposal_summaries: Vec<ProposalSummary>,
}

#[derive(Default)]
struct DelegateAccum {
    voted: usize,
    weight: Decimal,
    for_votes: usize,
    against_votes: usize,
    abstain_votes: usize,
    other_votes: usize,
}

#[derive(Default)]
struct ProposalAccum {
    voters: usize,
    for_weight: Decimal,
    against_weight: Decimal,
    abstain_weight: Decimal,
    other_weight: Decimal,
    total_weight: Decimal,
}

/// Folds vote records into the vote log and the two rollups.
///
/// Every input delegate gets a summary row even with zero votes, and every
/// input proposal gets one even with zero voters, so "who never engaged"
/// is answerable from the output alone. Records must already be free of
/// duplicate (delegate, proposal) pairs; a surviving duplicate or a
/// negative weight is returned as an error rather than folded in.
pub fn build_matrix(
    records: Vec<VoteRecord>,
    delegates: &[Delegate],
    proposals: &[Proposal],
) -> MatrixResult<MatrixReport> {
    let start_by_id: HashMap<&str, DateTime<Utc>> = proposals
        .iter()
        .map(|p| (p.id.as_str(), p.start_time))
        .collect();

    let mut vote_log = records;
    vote_log.sort_by(|a, b| {
        let sa = start_by_id.get(a.proposal.as_str());
        let sb = start_by_id.get(b.proposal.as_str());
        sa.cmp(&sb)
            .then_with(|| a.proposal.cmp(&b.proposal))
            .then_with(|| a.delegate.cmp(&b.delegate))
    });

    let mut by_delegate: HashMap<&str, DelegateAccum> = HashMap::new();
    let mut by_proposal: HashMap<&str, ProposalAccum> = HashMap::new();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for record in &vote_log {
        if record.weight < Decimal::ZERO {
            return Err(MatrixError::NegativeWeight {
                delegate: record.delegate.clone(),
                proposal: record.proposal.clone(),
            });
        }
        if !seen.insert((record.delegate.as_str(), record.proposal.as_str())) {
            return Err(MatrixError::DuplicateVote {
                delegate: record.delegate.clone(),
                proposal: record.proposal.clone(),
            });
        }

        let d = by_delegate.entry(record.delegate.as_str()).or_default();
        d.voted += 1;
        d.weight += record.weight;
        match &record.choice {
            VoteChoice::For => d.for_votes += 1,
            VoteChoice::Against => d.against_votes += 1,
            VoteChoice::Abstain => d.abstain_votes += 1,
            VoteChoice::Other(_) => d.other_votes += 1,
        }

        let p = by_proposal.entry(record.proposal.as_str()).or_default();
        p.voters += 1;
        p.total_weight += record.weight;
        match &record.choice {
            VoteChoice::For => p.for_weight += record.weight,
            VoteChoice::Against => p.against_weight += record.weight,
            VoteChoice::Abstain => p.abstain_weight += record.weight,
            VoteChoice::Other(_) => p.other_weight += record.weight,
        }
    }

    let proposal_count = proposals.len();
    let delegate_count = delegates.len();

    let mut delegate_summaries: Vec<DelegateSummary> = delegates
        .iter()
        .map(|delegate| {
            let accum = by_delegate.remove(delegate.address.as_str()).unwrap_or_default();
            DelegateSummary {
                address: delegate.address.clone(),
                display_name: delegate.display_name.clone(),
                voting_power: delegate.voting_power,
                proposals_voted: accum.voted,
                total_weight_cast: accum.weight,
                for_votes: accum.for_votes,
                against_votes: accum.against_votes,
                abstain_votes: accum.abstain_votes,
                other_votes: accum.other_votes,
                participation_rate: rate(accum.voted, proposal_count),
            }
        })
        .collect();
    // Voters absent from the delegate list still get a row so the three
    // tables stay jointly consistent for library callers; the collector
    // filters these out before the pipeline reaches this point.
    let stray: Vec<(String, DelegateAccum)> = by_delegate
        .into_iter()
        .map(|(address, accum)| (address.to_string(), accum))
        .collect();
    for (address, accum) in stray {
        delegate_summaries.push(DelegateSummary {
            address,
            display_name: None,
            voting_power: Decimal::ZERO,
            proposals_voted: accum.voted,
            total_weight_cast: accum.weight,
            for_votes: accum.for_votes,
            against_votes: accum.against_votes,
            abstain_votes: accum.abstain_votes,
            other_votes: accum.other_votes,
            participation_rate: rate(accum.voted, proposal_count),
        });
    }
    delegate_summaries.sort_by(|a, b| a.address.cmp(&b.address));

    let mut ordered_proposals: Vec<&Proposal> = proposals.iter().collect();
    ordered_proposals.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    let proposal_summaries = ordered_proposals
        .into_iter()
        .map(|proposal| {
            let accum = by_proposal.remove(proposal.id.as_str()).unwrap_or_default();
            ProposalSummary {
                id: proposal.id.clone(),
                title: proposal.title.clone(),
                status: proposal.status,
                start_time: proposal.start_time,
                voters: accum.voters,
                for_weight: accum.for_weight,
                against_weight: accum.against_weight,
                abstain_weight: accum.abstain_weight,
                other_weight: accum.other_weight,
                total_weight: accum.total_weight,
                participation_rate: rate(accum.voters, delegate_count),
            }
        })
        .collect();

    Ok(MatrixReport {
        vote_log,
        delegate_summaries,
        proposal_summaries,
    })
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProposalStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn proposal(id: &str, start: i64) -> Proposal {
        Proposal {
            id: id.to_string(),
            title: format!("Proposal {}", id),
            status: ProposalStatus::Executed,
            start_time: ts(start),
            end_time: ts(start + 100),
            for_weight: Decimal::ZERO,
            against_weight: Decimal::ZERO,
            abstain_weight: Decimal::ZERO,
        }
    }

    fn delegate(address: &str) -> Delegate {
        Delegate::new(address, None, dec!(100))
    }

    fn vote(
        delegate: &str,
        proposal: &str,
        choice: VoteChoice,
        weight: Decimal,
        cast_at: i64,
    ) -> VoteRecord {
        VoteRecord {
            delegate: delegate.to_string(),
            proposal: proposal.to_string(),
            choice,
            weight,
            cast_at: ts(cast_at),
            reason: None,
            raw_support: None,
            tx_hash: None,
        }
    }

    fn scenario() -> (Vec<VoteRecord>, Vec<Delegate>, Vec<Proposal>) {
        let delegates = vec![delegate("0xa"), delegate("0xb")];
        let proposals = vec![proposal("p1", 100), proposal("p2", 200)];
        let votes = vec![
            ("0xa", "p2", VoteChoice::For, dec!(10), 2),
            ("0xb", "p1", VoteChoice::Against, dec!(5), 1),
            ("0xa", "p1", VoteChoice::For, dec!(10), 1),
        ]
        .into_iter()
        .map(|(d, p, c, w, t)| vote(d, p, c, w, t))
        .collect();
        (votes, delegates, proposals)
    }

    #[test]
    fn orders_log_by_proposal_start_then_delegate() {
        let (votes, delegates, proposals) = scenario();
        let report = build_matrix(votes, &delegates, &proposals).unwrap();

        let order: Vec<(&str, &str)> = report
            .vote_log
            .iter()
            .map(|r| (r.proposal.as_str(), r.delegate.as_str()))
            .collect();
        assert_eq!(order, vec![("p1", "0xa"), ("p1", "0xb"), ("p2", "0xa")]);
    }

    #[test]
    fn summarizes_delegates_and_proposals() {
        let (votes, delegates, proposals) = scenario();
        let report = build_matrix(votes, &delegates, &proposals).unwrap();

        let a = &report.delegate_summaries[0];
        assert_eq!(a.address, "0xa");
        assert_eq!(a.proposals_voted, 2);
        assert_eq!(a.total_weight_cast, dec!(20));
        assert_eq!(a.for_votes, 2);
        assert_eq!(a.participation_rate, 1.0);

        let b = &report.delegate_summaries[1];
        assert_eq!(b.proposals_voted, 1);
        assert_eq!(b.total_weight_cast, dec!(5));
        assert_eq!(b.against_votes, 1);
        assert_eq!(b.participation_rate, 0.5);

        let p1 = &report.proposal_summaries[0];
        assert_eq!(p1.id, "p1");
        assert_eq!(p1.voters, 2);
        assert_eq!(p1.for_weight, dec!(10));
        assert_eq!(p1.against_weight, dec!(5));
        assert_eq!(p1.participation_rate, 1.0);

        let p2 = &report.proposal_summaries[1];
        assert_eq!(p2.voters, 1);
        assert_eq!(p2.for_weight, dec!(10));
        assert_eq!(p2.participation_rate, 0.5);
    }

    #[test]
    fn log_size_matches_input_and_is_idempotent() {
        let (votes, delegates, proposals) = scenario();
        let first = build_matrix(votes.clone(), &delegates, &proposals).unwrap();
        assert_eq!(first.vote_log.len(), votes.len());

        // Same input shuffled must produce byte-identical output.
        let mut shuffled = votes;
        shuffled.reverse();
        let second = build_matrix(shuffled, &delegates, &proposals).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn per_choice_weights_reconcile_with_log() {
        let (votes, delegates, proposals) = scenario();
        let report = build_matrix(votes, &delegates, &proposals).unwrap();

        for summary in &report.proposal_summaries {
            let log_total: Decimal = report
                .vote_log
                .iter()
                .filter(|r| r.proposal == summary.id)
                .map(|r| r.weight)
                .sum();
            let choice_total = summary.for_weight
                + summary.against_weight
                + summary.abstain_weight
                + summary.other_weight;
            assert_eq!(choice_total, log_total);
            assert_eq!(summary.total_weight, log_total);
        }
    }

    #[test]
    fn zero_vote_delegate_still_gets_a_row() {
        let (votes, mut delegates, proposals) = scenario();
        delegates.push(delegate("0xc"));
        let report = build_matrix(votes, &delegates, &proposals).unwrap();

        assert_eq!(report.delegate_summaries.len(), 3);
        let c = report
            .delegate_summaries
            .iter()
            .find(|d| d.address == "0xc")
            .unwrap();
        assert_eq!(c.proposals_voted, 0);
        assert_eq!(c.total_weight_cast, Decimal::ZERO);
        assert_eq!(c.participation_rate, 0.0);
    }

    #[test]
    fn zero_vote_proposal_still_gets_a_row() {
        let (votes, delegates, mut proposals) = scenario();
        proposals.push(proposal("p3", 300));
        let report = build_matrix(votes, &delegates, &proposals).unwrap();

        assert_eq!(report.proposal_summaries.len(), 3);
        let p3 = &report.proposal_summaries[2];
        assert_eq!(p3.id, "p3");
        assert_eq!(p3.voters, 0);
        assert_eq!(p3.total_weight, Decimal::ZERO);
        assert_eq!(p3.participation_rate, 0.0);
    }

    #[test]
    fn rejects_duplicate_pairs() {
        let (mut votes, delegates, proposals) = scenario();
        votes.push(vote("0xa", "p1", VoteChoice::Against, dec!(1), 9));
        let err = build_matrix(votes, &delegates, &proposals).unwrap_err();
        assert!(matches!(err, MatrixError::DuplicateVote { .. }));
    }

    #[test]
    fn rejects_negative_weights() {
        let (mut votes, delegates, proposals) = scenario();
        votes.push(vote("0xb", "p2", VoteChoice::For, dec!(-1), 9));
        let err = build_matrix(votes, &delegates, &proposals).unwrap_err();
        assert!(matches!(err, MatrixError::NegativeWeight { .. }));
    }

    #[test]
    fn empty_inputs_yield_empty_report() {
        let report = build_matrix(Vec::new(), &[], &[]).unwrap();
        assert!(report.vote_log.is_empty());
        assert!(report.delegate_summaries.is_empty());
        assert!(report.proposal_summaries.is_empty());
    }
}
