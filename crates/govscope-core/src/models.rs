use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Active,
    Succeeded,
    Defeated,
    Executed,
    Expired,
    Canceled,
    Unknown,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "pending"),
            ProposalStatus::Active => write!(f, "active"),
            ProposalStatus::Succeeded => write!(f, "succeeded"),
            ProposalStatus::Defeated => write!(f, "defeated"),
            ProposalStatus::Executed => write!(f, "executed"),
            ProposalStatus::Expired => write!(f, "expired"),
            ProposalStatus::Canceled => write!(f, "canceled"),
            ProposalStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl ProposalStatus {
    /// Statuses the API adds later land on `Unknown` instead of failing
    /// the whole page.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => ProposalStatus::Pending,
            "active" => ProposalStatus::Active,
            "succeeded" => ProposalStatus::Succeeded,
            "defeated" => ProposalStatus::Defeated,
            "executed" => ProposalStatus::Executed,
            "expired" => ProposalStatus::Expired,
            "canceled" | "cancelled" => ProposalStatus::Canceled,
            _ => ProposalStatus::Unknown,
        }
    }
}

// Serialized as a plain lowercase string, same as it reads upstream.
impl Serialize for ProposalStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProposalStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ProposalStatus::from_str(&raw))
    }
}

/// How a delegate voted. DAO-specific options that don't map onto the
/// standard three are preserved verbatim as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
    Other(String),
}

impl VoteChoice {
    /// Maps a raw upstream support type onto a canonical choice. The
    /// synonym table covers the spellings seen across Tally-indexed DAOs.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "for" | "yes" | "support" | "approve" | "in_favor" | "infavor" | "aye" | "1"
            | "true" => VoteChoice::For,
            "against" | "no" | "oppose" | "nay" | "0" | "false" => VoteChoice::Against,
            "abstain" | "abstention" | "present" | "2" => VoteChoice::Abstain,
            _ => VoteChoice::Other(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteChoice::For => write!(f, "for"),
            VoteChoice::Against => write!(f, "against"),
            VoteChoice::Abstain => write!(f, "abstain"),
            VoteChoice::Other(raw) => write!(f, "{}", raw),
        }
    }
}

// Serialized as a plain string so matrix rows stay flat for tabular output.
impl Serialize for VoteChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VoteChoice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(VoteChoice::normalize(&raw))
    }
}

/// Lowercases an account address. Addresses are case-insensitive upstream
/// (checksum casing varies), so every comparison goes through this form.
pub fn canonical_address(address: &str) -> String {
    address.trim().to_lowercase()
}

pub fn validate_address(address: &str) -> bool {
    address.starts_with("0x")
        && address.len() == 42
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// A governance vote item with a defined voting window. Immutable once
/// fetched; the per-choice weights are the totals reported upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub status: ProposalStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub for_weight: Decimal,
    pub against_weight: Decimal,
    pub abstain_weight: Decimal,
}

/// An account entrusted with voting power. Voting power is kept in
/// `Decimal` - on-chain token weights overflow f64 precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegate {
    pub address: String,
    pub display_name: Option<String>,
    pub voting_power: Decimal,
}

impl Delegate {
    pub fn new(address: &str, display_name: Option<String>, voting_power: Decimal) -> Self {
        Self {
            address: canonical_address(address),
            display_name,
            voting_power,
        }
    }
}

/// One delegate's vote on one proposal - the atomic unit of the matrix.
/// Unique per (delegate, proposal); revotes collapse to the latest
/// `cast_at` before aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub delegate: String,
    pub proposal: String,
    pub choice: VoteChoice,
    pub weight: Decimal,
    pub cast_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub raw_support: Option<String>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegateSummary {
    pub address: String,
    pub display_name: Option<String>,
    pub voting_power: Decimal,
    pub proposals_voted: usize,
    pub total_weight_cast: Decimal,
    pub for_votes: usize,
    pub against_votes: usize,
    pub abstain_votes: usize,
    pub other_votes: usize,
    pub participation_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalSummary {
    pub id: String,
    pub title: String,
    pub status: ProposalStatus,
    pub start_time: DateTime<Utc>,
    pub voters: usize,
    pub for_weight: Decimal,
    pub against_weight: Decimal,
    pub abstain_weight: Decimal,
    pub other_weight: Decimal,
    pub total_weight: Decimal,
    pub participation_rate: f64,
}
