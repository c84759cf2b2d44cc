//! Signing ceremony.
//!
//! Signing is a lightweight re-authentication: the broker re-enters their password,
//! the authentication provider confirms it, and the ceremony records that fact.
//! Nothing here offers non-repudiation; the stored token only shows that a
//! re-verification succeeded at a given moment.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::domain::{BrokerId, PartnershipId, PartnershipStatus, ProposalStatus, Signature};
use super::service::PartnershipServiceError;
use super::store::PartnershipRecord;

/// Secret presented for re-verification. Never logged or serialized back out.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Authentication provider capability consumed by the ceremony.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, broker: &BrokerId, credential: &Credential) -> Result<bool, VerifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("authentication provider unavailable: {0}")]
    Unavailable(String),
}

/// Where a signature came from, kept alongside the token for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningOrigin {
    pub ip_address: Option<IpAddr>,
    pub client: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignOutcome {
    pub signed: bool,
    pub all_signed: bool,
    #[serde(skip)]
    pub activated: bool,
}

/// Preconditions for signing, checked on a snapshot before the provider call and
/// again inside the transaction.
pub(crate) fn ensure_signable(
    record: &PartnershipRecord,
    broker: &BrokerId,
    now: DateTime<Utc>,
) -> Result<(), PartnershipServiceError> {
    let partnership = &record.partnership;
    if partnership.is_lapsed(now) {
        return Err(PartnershipServiceError::PartnershipExpired {
            partnership_id: partnership.id,
            expired_at: partnership.expires_at,
        });
    }
    if !partnership.status.holds_terms() {
        return Err(PartnershipServiceError::PartnershipClosed {
            partnership_id: partnership.id,
            status: partnership.status,
        });
    }
    if !record.is_participant(broker) {
        return Err(PartnershipServiceError::NotAParticipant(broker.clone()));
    }
    if let Some(pending) = record.pending_proposal() {
        if !pending.split.same_terms(&partnership.split) {
            return Err(PartnershipServiceError::TermsUnderNegotiation {
                partnership_id: partnership.id,
                proposal_id: pending.id,
            });
        }
    }
    Ok(())
}

/// Digest binding the verified secret to the broker, partnership, and moment.
pub fn signature_token(
    partnership: &PartnershipId,
    broker: &BrokerId,
    credential: &Credential,
    at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(partnership.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(broker.0.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(credential.expose().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

/// Record a verified signature and activate the partnership once everyone has signed.
///
/// Re-signing overwrites the signature row and leaves the participant signed.
pub fn record_signature(
    record: &mut PartnershipRecord,
    broker: &BrokerId,
    token: String,
    origin: SigningOrigin,
    now: DateTime<Utc>,
) -> Result<SignOutcome, PartnershipServiceError> {
    ensure_signable(record, broker, now)?;

    let partnership_id = record.id();
    record.signatures.insert(
        broker.clone(),
        Signature {
            partnership_id,
            broker_id: broker.clone(),
            token,
            ip_address: origin.ip_address,
            user_agent: origin.client,
            created_at: now,
        },
    );

    let participant = record
        .participant_mut(broker)
        .ok_or_else(|| PartnershipServiceError::NotAParticipant(broker.clone()))?;
    participant.signed = true;
    participant.signed_at = Some(now);
    participant.signature_ip = origin.ip_address;

    let all_signed = record.all_signed();
    let activated = all_signed && record.partnership.status == PartnershipStatus::Pending;
    if activated {
        record.partnership.status = PartnershipStatus::Active;
        record.partnership.contract_signed = true;
        record.partnership.contract_signed_at = Some(now);
        for proposal in record.proposals.iter_mut().filter(|p| p.is_pending()) {
            proposal.resolve(ProposalStatus::Accepted, now);
        }
    }
    record.touch(now);

    Ok(SignOutcome {
        signed: true,
        all_signed,
        activated,
    })
}
