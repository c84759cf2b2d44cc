use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::split::CommissionSplit;

/// Identifier wrapper for a broker account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerId(pub String);

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrokerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Reference to the listing a partnership is negotiated over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartnershipId(pub Uuid);

impl PartnershipId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PartnershipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of the partnership aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnershipStatus {
    Pending,
    Active,
    Rejected,
    Expired,
    Cancelled,
}

impl PartnershipStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PartnershipStatus::Pending => "pending",
            PartnershipStatus::Active => "active",
            PartnershipStatus::Rejected => "rejected",
            PartnershipStatus::Expired => "expired",
            PartnershipStatus::Cancelled => "cancelled",
        }
    }

    /// Pending and active partnerships carry live terms; the rest are history.
    pub const fn holds_terms(self) -> bool {
        matches!(self, PartnershipStatus::Pending | PartnershipStatus::Active)
    }
}

impl fmt::Display for PartnershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Superseded,
}

impl ProposalStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Seat a broker holds in the partnership: the listing owner or a numbered partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantRole {
    Owner,
    Partner(u8),
}

impl ParticipantRole {
    pub fn label(self) -> String {
        match self {
            ParticipantRole::Owner => "owner".to_string(),
            ParticipantRole::Partner(number) => format!("partner_{number}"),
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown participant role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for ParticipantRole {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "owner" {
            return Ok(ParticipantRole::Owner);
        }

        value
            .strip_prefix("partner_")
            .and_then(|number| number.parse::<u8>().ok())
            .filter(|number| *number >= 1)
            .map(ParticipantRole::Partner)
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

impl Serialize for ParticipantRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for ParticipantRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Aggregate root for a multi-broker commission-sharing agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partnership {
    pub id: PartnershipId,
    pub property_id: PropertyId,
    pub owner_broker_id: BrokerId,
    pub initiator_broker_id: BrokerId,
    pub split: CommissionSplit,
    pub status: PartnershipStatus,
    pub contract_signed: bool,
    pub contract_signed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every committed transaction.
    pub version: u64,
}

impl Partnership {
    /// Pending partnerships lapse once their window has passed, whether or not
    /// the sweeper has visited them yet.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            PartnershipStatus::Expired => true,
            PartnershipStatus::Pending => self.expires_at < now,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub broker_id: BrokerId,
    pub role: ParticipantRole,
    pub commission_percent: f64,
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub signature_ip: Option<IpAddr>,
    pub added_by: BrokerId,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn clear_signature(&mut self) -> bool {
        let was_signed = self.signed;
        self.signed = false;
        self.signed_at = None;
        self.signature_ip = None;
        was_signed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub partnership_id: PartnershipId,
    pub proposed_by: BrokerId,
    pub split: CommissionSplit,
    pub message: Option<String>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    pub(crate) fn resolve(&mut self, status: ProposalStatus, at: DateTime<Utc>) {
        self.status = status;
        self.responded_at = Some(at);
    }
}

/// Audit artifact left by the signing ceremony.
///
/// The token is a digest of a successful password re-verification. It proves the
/// broker re-authenticated at `created_at`; it is not a cryptographic signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub partnership_id: PartnershipId,
    pub broker_id: BrokerId,
    pub token: String,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
