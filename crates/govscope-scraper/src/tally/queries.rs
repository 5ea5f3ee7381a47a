//! GraphQL documents and response shapes for the Tally API.
//!
//! Each response is deserialized through an explicit DTO before it becomes
//! a core model; anything that does not match the expected shape surfaces
//! as a schema error instead of a silent partial row. Tally wraps list
//! results in a nodes/pageInfo connection whose nodes are typed by inline
//! fragment, so a node of a different concrete type arrives as an empty
//! object and is skipped rather than treated as malformed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use govscope_core::{
    canonical_address, validate_address, Delegate, Proposal, ProposalStatus, VoteChoice, VoteRecord,
};

use crate::error::{FetchError, FetchResult};

pub const ORGANIZATION_QUERY: &str = r#"
query GetOrganization($input: OrganizationInput!) {
    organization(input: $input) {
        id
        slug
        name
        proposalsCount
        delegatesCount
    }
}
"#;

pub const PROPOSALS_QUERY: &str = r#"
query GetProposals($input: ProposalsInput!) {
    proposals(input: $input) {
        nodes {
            ... on Proposal {
                id
                metadata {
                    title
                }
                status
                start {
                    ... on Block {
                        timestamp
                    }
                    ... on BlocklessTimestamp {
                        timestamp
                    }
                }
                end {
                    ... on Block {
                        timestamp
                    }
                    ... on BlocklessTimestamp {
                        timestamp
                    }
                }
                voteStats {
                    type
                    votesCount
                }
            }
        }
        pageInfo {
            lastCursor
        }
    }
}
"#;

pub const DELEGATES_QUERY: &str = r#"
query GetDelegates($input: DelegatesInput!) {
    delegates(input: $input) {
        nodes {
            ... on Delegate {
                account {
                    address
                    name
                    ens
                }
                votesCount
            }
        }
        pageInfo {
            lastCursor
        }
    }
}
"#;

pub const VOTES_QUERY: &str = r#"
query GetVotes($input: VotesInput!) {
    votes(input: $input) {
        nodes {
            ... on OnchainVote {
                id
                type
                amount
                reason
                voter {
                    address
                    name
                    ens
                }
                block {
                    timestamp
                }
                txHash
            }
        }
        pageInfo {
            lastCursor
        }
    }
}
"#;

/// One page of items plus the cursor for the next one, if any.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// A cursor-paginated query: the document, its variables for a given
/// cursor position, and the typed extraction of one response page.
pub trait PagedQuery: Send + Sync {
    type Item: Send;

    fn document(&self) -> &'static str;
    fn variables(&self, cursor: Option<&str>, page_size: u32) -> Value;
    fn extract(&self, data: Value) -> FetchResult<Page<Self::Item>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub last_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
    #[serde(default)]
    pub page_info: PageInfo,
}

fn connection<T: DeserializeOwned>(mut data: Value, field: &str) -> FetchResult<Connection<T>> {
    let value = data
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| FetchError::Schema(format!("response missing {} field", field)))?;
    serde_json::from_value(value)
        .map_err(|e| FetchError::Schema(format!("malformed {} payload: {}", field, e)))
}

/// Ids and counters arrive as strings or bare numbers depending on the
/// field; both are accepted and kept as strings.
fn de_stringly<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn de_opt_stringly<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn parse_timestamp(raw: &str) -> FetchResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FetchError::Schema(format!("timestamp {:?} is not RFC 3339: {}", raw, e)))
}

fn parse_weight(raw: Option<&str>, context: &str) -> FetchResult<Decimal> {
    match raw {
        None | Some("") => Ok(Decimal::ZERO),
        Some(raw) => raw
            .parse::<Decimal>()
            .map_err(|e| FetchError::Schema(format!("{} {:?} is not numeric: {}", context, raw, e))),
    }
}

// ---------------------------------------------------------------------------
// Organization lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(deserialize_with = "de_stringly")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub proposals_count: Option<u64>,
    #[serde(default)]
    pub delegates_count: Option<u64>,
}

pub struct OrganizationBySlug {
    pub slug: String,
}

impl OrganizationBySlug {
    pub fn variables(&self) -> Value {
        json!({ "input": { "slug": self.slug } })
    }

    pub fn extract(mut data: Value) -> FetchResult<Organization> {
        let value = data
            .get_mut("organization")
            .map(Value::take)
            .filter(|v| !v.is_null())
            .ok_or_else(|| FetchError::Schema("response missing organization field".into()))?;
        serde_json::from_value(value)
            .map_err(|e| FetchError::Schema(format!("malformed organization payload: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Proposal listing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalNode {
    #[serde(default, deserialize_with = "de_opt_stringly")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Option<ProposalMetadata>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start: Option<TimePoint>,
    #[serde(default)]
    pub end: Option<TimePoint>,
    #[serde(default)]
    pub vote_stats: Option<Vec<VoteStat>>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalMetadata {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimePoint {
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStat {
    #[serde(rename = "type", default)]
    pub support: Option<String>,
    #[serde(default, deserialize_with = "de_opt_stringly")]
    pub votes_count: Option<String>,
}

impl ProposalNode {
    fn into_proposal(self) -> FetchResult<Option<Proposal>> {
        // Nodes of other concrete types deserialize as empty objects.
        let Some(id) = self.id else { return Ok(None) };

        let title = self
            .metadata
            .and_then(|m| m.title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Proposal {}", id));
        let status = self
            .status
            .as_deref()
            .map(ProposalStatus::from_str)
            .unwrap_or(ProposalStatus::Unknown);
        let start_time = parse_time_point(self.start.as_ref(), "start", &id)?;
        let end_time = parse_time_point(self.end.as_ref(), "end", &id)?;

        let mut for_weight = Decimal::ZERO;
        let mut against_weight = Decimal::ZERO;
        let mut abstain_weight = Decimal::ZERO;
        for stat in self.vote_stats.unwrap_or_default() {
            let weight = parse_weight(
                stat.votes_count.as_deref(),
                &format!("proposal {} vote stat", id),
            )?;
            match stat.support.as_deref().map(VoteChoice::normalize) {
                Some(VoteChoice::For) => for_weight += weight,
                Some(VoteChoice::Against) => against_weight += weight,
                Some(VoteChoice::Abstain) => abstain_weight += weight,
                _ => {}
            }
        }

        Ok(Some(Proposal {
            id,
            title,
            status,
            start_time,
            end_time,
            for_weight,
            against_weight,
            abstain_weight,
        }))
    }
}

fn parse_time_point(
    point: Option<&TimePoint>,
    field: &str,
    proposal_id: &str,
) -> FetchResult<DateTime<Utc>> {
    let raw = point
        .and_then(|p| p.timestamp.as_deref())
        .ok_or_else(|| {
            FetchError::Schema(format!(
                "proposal {} missing {} timestamp",
                proposal_id, field
            ))
        })?;
    parse_timestamp(raw)
}

pub struct ProposalsByOrganization {
    pub organization_id: String,
}

impl PagedQuery for ProposalsByOrganization {
    type Item = Proposal;

    fn document(&self) -> &'static str {
        PROPOSALS_QUERY
    }

    fn variables(&self, cursor: Option<&str>, page_size: u32) -> Value {
        let mut page = json!({ "limit": page_size });
        if let Some(cursor) = cursor {
            page["afterCursor"] = json!(cursor);
        }
        json!({
            "input": {
                "filters": {
                    "organizationId": self.organization_id,
                    "includeArchived": true
                },
                "page": page,
                "sort": { "sortBy": "id", "isDescending": true }
            }
        })
    }

    fn extract(&self, data: Value) -> FetchResult<Page<Proposal>> {
        let conn: Connection<ProposalNode> = connection(data, "proposals")?;
        let next_cursor = conn.page_info.last_cursor;
        let mut items = Vec::with_capacity(conn.nodes.len());
        for node in conn.nodes {
            if let Some(proposal) = node.into_proposal()? {
                items.push(proposal);
            }
        }
        Ok(Page { items, next_cursor })
    }
}

// ---------------------------------------------------------------------------
// Delegate listing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountNode {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ens: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateNode {
    #[serde(default)]
    pub account: Option<AccountNode>,
    #[serde(default, deserialize_with = "de_opt_stringly")]
    pub votes_count: Option<String>,
}

impl DelegateNode {
    fn into_delegate(self) -> FetchResult<Option<Delegate>> {
        let Some(account) = self.account else { return Ok(None) };
        if account.address.is_empty() {
            // Rows without an address cannot participate in the matrix.
            return Ok(None);
        }
        if !validate_address(&account.address) {
            tracing::debug!(address = %account.address, "delegate address has unexpected shape");
        }
        let voting_power = parse_weight(self.votes_count.as_deref(), "delegate votes count")?;
        let display_name = account
            .name
            .filter(|n| !n.is_empty())
            .or(account.ens.filter(|e| !e.is_empty()));
        Ok(Some(Delegate::new(&account.address, display_name, voting_power)))
    }
}

pub struct DelegatesByOrganization {
    pub organization_id: String,
}

impl PagedQuery for DelegatesByOrganization {
    type Item = Delegate;

    fn document(&self) -> &'static str {
        DELEGATES_QUERY
    }

    fn variables(&self, cursor: Option<&str>, page_size: u32) -> Value {
        let mut page = json!({ "limit": page_size });
        if let Some(cursor) = cursor {
            page["afterCursor"] = json!(cursor);
        }
        json!({
            "input": {
                "filters": { "organizationId": self.organization_id },
                "page": page,
                "sort": { "sortBy": "id", "isDescending": false }
            }
        })
    }

    fn extract(&self, data: Value) -> FetchResult<Page<Delegate>> {
        let conn: Connection<DelegateNode> = connection(data, "delegates")?;
        let next_cursor = conn.page_info.last_cursor;
        let mut items = Vec::with_capacity(conn.nodes.len());
        for node in conn.nodes {
            if let Some(delegate) = node.into_delegate()? {
                items.push(delegate);
            }
        }
        Ok(Page { items, next_cursor })
    }
}

// ---------------------------------------------------------------------------
// Votes by proposal
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteNode {
    #[serde(default, deserialize_with = "de_opt_stringly")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub support: Option<String>,
    #[serde(default, deserialize_with = "de_opt_stringly")]
    pub amount: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub voter: Option<AccountNode>,
    #[serde(default)]
    pub block: Option<TimePoint>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

impl VoteNode {
    fn into_record(self, proposal_id: &str) -> FetchResult<VoteRecord> {
        let voter = self.voter.ok_or_else(|| {
            FetchError::Schema(format!("vote on proposal {} missing voter", proposal_id))
        })?;
        if voter.address.is_empty() {
            return Err(FetchError::Schema(format!(
                "vote on proposal {} has an empty voter address",
                proposal_id
            )));
        }

        let weight = parse_weight(
            self.amount.as_deref(),
            &format!("vote amount on proposal {}", proposal_id),
        )?;
        let raw_ts = self.block.and_then(|b| b.timestamp).ok_or_else(|| {
            FetchError::Schema(format!(
                "vote on proposal {} missing block timestamp",
                proposal_id
            ))
        })?;
        let cast_at = parse_timestamp(&raw_ts)?;

        let choice = match self.support.as_deref() {
            Some(raw) if !raw.trim().is_empty() => VoteChoice::normalize(raw),
            _ => VoteChoice::Other("unknown".to_string()),
        };

        Ok(VoteRecord {
            delegate: canonical_address(&voter.address),
            proposal: proposal_id.to_string(),
            choice,
            weight,
            cast_at,
            reason: self.reason.filter(|r| !r.is_empty()),
            raw_support: self.support,
            tx_hash: self.tx_hash,
        })
    }
}

pub struct VotesByProposal {
    pub proposal_id: String,
}

impl PagedQuery for VotesByProposal {
    type Item = VoteRecord;

    fn document(&self) -> &'static str {
        VOTES_QUERY
    }

    fn variables(&self, cursor: Option<&str>, page_size: u32) -> Value {
        let mut page = json!({ "limit": page_size });
        if let Some(cursor) = cursor {
            page["afterCursor"] = json!(cursor);
        }
        json!({
            "input": {
                "filters": { "proposalId": self.proposal_id },
                "page": page,
                "sort": { "sortBy": "id", "isDescending": false }
            }
        })
    }

    fn extract(&self, data: Value) -> FetchResult<Page<VoteRecord>> {
        let conn: Connection<VoteNode> = connection(data, "votes")?;
        let next_cursor = conn.page_info.last_cursor;
        let mut items = Vec::with_capacity(conn.nodes.len());
        for node in conn.nodes {
            // Offchain vote nodes fall outside the fragment and arrive empty.
            if node.id.is_none() && node.voter.is_none() {
                continue;
            }
            items.push(node.into_record(&self.proposal_id)?);
        }
        Ok(Page { items, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_vote_nodes() {
        let node: VoteNode = serde_json::from_value(json!({
            "id": "77",
            "type": "FOR",
            "amount": "1250000000000000000000",
            "reason": "looks good",
            "voter": { "address": "0xABCD00000000000000000000000000000000ef12" },
            "block": { "timestamp": "2023-03-14T01:02:03Z" },
            "txHash": "0xdeadbeef"
        }))
        .unwrap();

        let record = node.into_record("p1").unwrap();
        assert_eq!(record.delegate, "0xabcd00000000000000000000000000000000ef12");
        assert_eq!(record.proposal, "p1");
        assert_eq!(record.choice, VoteChoice::For);
        assert_eq!(record.weight, dec!(1250000000000000000000));
        assert_eq!(record.reason.as_deref(), Some("looks good"));
    }

    #[test]
    fn malformed_vote_amount_is_a_schema_error() {
        let node: VoteNode = serde_json::from_value(json!({
            "id": "77",
            "type": "FOR",
            "amount": "not-a-number",
            "voter": { "address": "0xabc" },
            "block": { "timestamp": "2023-03-14T01:02:03Z" }
        }))
        .unwrap();

        let err = node.into_record("p1").unwrap_err();
        assert!(matches!(err, FetchError::Schema(_)));
    }

    #[test]
    fn skips_nodes_outside_the_fragment() {
        let query = VotesByProposal {
            proposal_id: "p1".into(),
        };
        let page = query
            .extract(json!({
                "votes": {
                    "nodes": [
                        {},
                        {
                            "id": "1",
                            "type": "abstain",
                            "amount": "5",
                            "voter": { "address": "0xaa" },
                            "block": { "timestamp": "2023-01-01T00:00:00Z" }
                        }
                    ],
                    "pageInfo": { "lastCursor": "cur-1" }
                }
            }))
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].choice, VoteChoice::Abstain);
        assert_eq!(page.next_cursor.as_deref(), Some("cur-1"));
    }

    #[test]
    fn converts_proposal_nodes_with_blockless_timestamps() {
        let query = ProposalsByOrganization {
            organization_id: "1".into(),
        };
        let page = query
            .extract(json!({
                "proposals": {
                    "nodes": [{
                        "id": 42,
                        "metadata": { "title": "Fund the grants round" },
                        "status": "EXECUTED",
                        "start": { "timestamp": "2023-01-01T00:00:00Z" },
                        "end": { "timestamp": "2023-01-08T00:00:00Z" },
                        "voteStats": [
                            { "type": "FOR", "votesCount": "100" },
                            { "type": "AGAINST", "votesCount": "40" },
                            { "type": "pendingfor", "votesCount": "7" }
                        ]
                    }],
                    "pageInfo": { "lastCursor": null }
                }
            }))
            .unwrap();

        assert_eq!(page.items.len(), 1);
        let p = &page.items[0];
        assert_eq!(p.id, "42");
        assert_eq!(p.status, ProposalStatus::Executed);
        assert_eq!(p.for_weight, dec!(100));
        assert_eq!(p.against_weight, dec!(40));
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn delegate_rows_without_address_are_dropped() {
        let query = DelegatesByOrganization {
            organization_id: "1".into(),
        };
        let page = query
            .extract(json!({
                "delegates": {
                    "nodes": [
                        { "account": { "address": "" }, "votesCount": "10" },
                        { "account": { "address": "0xBB", "name": "carol.eth" }, "votesCount": "250" }
                    ],
                    "pageInfo": {}
                }
            }))
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].address, "0xbb");
        assert_eq!(page.items[0].display_name.as_deref(), Some("carol.eth"));
        assert_eq!(page.items[0].voting_power, dec!(250));
    }

    #[test]
    fn missing_connection_field_is_a_schema_error() {
        let query = VotesByProposal {
            proposal_id: "p1".into(),
        };
        let err = query.extract(json!({ "unexpected": {} })).unwrap_err();
        assert!(matches!(err, FetchError::Schema(_)));
    }
}
