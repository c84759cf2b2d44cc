use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::MAX_EXPIRY_CEILING_DAYS;

use super::domain::{
    BrokerId, Participant, ParticipantRole, Partnership, PartnershipId, PartnershipStatus,
    PropertyId, Proposal, ProposalId, ProposalStatus, Signature,
};
use super::participants::{MAX_PARTICIPANTS, MIN_PARTICIPANTS};
use super::service::PartnershipServiceError;
use super::split::{totals_one_hundred, CommissionSplit};

/// Everything persisted for one partnership; the unit of locking and commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnershipRecord {
    pub partnership: Partnership,
    pub participants: Vec<Participant>,
    pub proposals: Vec<Proposal>,
    pub signatures: BTreeMap<BrokerId, Signature>,
}

/// Validated inputs for opening a partnership.
#[derive(Debug, Clone)]
pub struct PartnershipDraft {
    pub property_id: PropertyId,
    pub owner_broker_id: BrokerId,
    pub initiator_broker_id: BrokerId,
    pub split: CommissionSplit,
    pub message: Option<String>,
    pub expires_in_days: u32,
}

impl PartnershipRecord {
    /// Build the aggregate with its participants and opening proposal.
    ///
    /// The owner takes the `owner` seat; every other broker in the split is seated
    /// as `partner_1..` in split order.
    pub fn create(
        draft: PartnershipDraft,
        now: DateTime<Utc>,
    ) -> Result<Self, PartnershipServiceError> {
        let PartnershipDraft {
            property_id,
            owner_broker_id,
            initiator_broker_id,
            split,
            message,
            expires_in_days,
        } = draft;

        if split.len() > MAX_PARTICIPANTS {
            return Err(PartnershipServiceError::TooManyParticipants {
                max: MAX_PARTICIPANTS,
            });
        }
        if split.len() < MIN_PARTICIPANTS {
            return Err(PartnershipServiceError::TooFewParticipants {
                min: MIN_PARTICIPANTS,
            });
        }
        for required in [&owner_broker_id, &initiator_broker_id] {
            if !split.contains(required) {
                return Err(PartnershipServiceError::SplitMismatch {
                    expected: vec![required.clone()],
                    found: split.brokers().cloned().collect(),
                });
            }
        }

        let expires_at = now
            .checked_add_signed(Duration::days(i64::from(expires_in_days)))
            .filter(|_| expires_in_days <= MAX_EXPIRY_CEILING_DAYS)
            .ok_or(PartnershipServiceError::InvalidExpiry {
                days: expires_in_days,
                max: MAX_EXPIRY_CEILING_DAYS,
            })?;

        let id = PartnershipId::generate();
        let mut next_partner = 1u8;
        let participants = split
            .iter()
            .map(|(broker, percent)| {
                let role = if *broker == owner_broker_id {
                    ParticipantRole::Owner
                } else {
                    let role = ParticipantRole::Partner(next_partner);
                    next_partner += 1;
                    role
                };
                Participant {
                    broker_id: broker.clone(),
                    role,
                    commission_percent: percent,
                    signed: false,
                    signed_at: None,
                    signature_ip: None,
                    added_by: initiator_broker_id.clone(),
                    joined_at: now,
                }
            })
            .collect();

        let opening = Proposal {
            id: ProposalId::generate(),
            partnership_id: id,
            proposed_by: initiator_broker_id.clone(),
            split: split.clone(),
            message,
            status: ProposalStatus::Pending,
            created_at: now,
            responded_at: None,
        };

        Ok(Self {
            partnership: Partnership {
                id,
                property_id,
                owner_broker_id,
                initiator_broker_id,
                split,
                status: PartnershipStatus::Pending,
                contract_signed: false,
                contract_signed_at: None,
                expires_at,
                created_at: now,
                updated_at: now,
                version: 0,
            },
            participants,
            proposals: vec![opening],
            signatures: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> PartnershipId {
        self.partnership.id
    }

    pub fn participant(&self, broker: &BrokerId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| &participant.broker_id == broker)
    }

    pub(crate) fn participant_mut(&mut self, broker: &BrokerId) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|participant| &participant.broker_id == broker)
    }

    pub fn is_participant(&self, broker: &BrokerId) -> bool {
        self.participant(broker).is_some()
    }

    pub fn participant_ids(&self) -> BTreeSet<BrokerId> {
        self.participants
            .iter()
            .map(|participant| participant.broker_id.clone())
            .collect()
    }

    pub fn proposal(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.iter().find(|proposal| &proposal.id == id)
    }

    pub(crate) fn proposal_mut(&mut self, id: &ProposalId) -> Option<&mut Proposal> {
        self.proposals.iter_mut().find(|proposal| &proposal.id == id)
    }

    pub fn pending_proposal(&self) -> Option<&Proposal> {
        self.proposals.iter().find(|proposal| proposal.is_pending())
    }

    pub fn all_signed(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .iter()
                .all(|participant| participant.signed)
    }

    pub fn signed_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|participant| participant.signed)
            .count()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.partnership.updated_at = now;
    }

    /// Structural invariants every committed record must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        let count = self.participants.len();
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&count) {
            return Err(format!("partnership has {count} participants"));
        }

        let owners = self
            .participants
            .iter()
            .filter(|participant| participant.role == ParticipantRole::Owner)
            .count();
        if owners != 1 {
            return Err(format!("partnership has {owners} owners"));
        }

        let roles: BTreeSet<String> = self
            .participants
            .iter()
            .map(|participant| participant.role.label())
            .collect();
        if roles.len() != count {
            return Err("participant roles are not unique".to_string());
        }

        let pending = self
            .proposals
            .iter()
            .filter(|proposal| proposal.is_pending())
            .count();
        if pending > 1 {
            return Err(format!("{pending} proposals are pending"));
        }

        if self.partnership.status.holds_terms() {
            let split = &self.partnership.split;
            if !totals_one_hundred(split.total()) {
                return Err(format!("split totals {:.2}%", split.total()));
            }
            if split.broker_set() != self.participant_ids() {
                return Err("split does not cover the participants".to_string());
            }
            for participant in &self.participants {
                let expected = split.percent_for(&participant.broker_id).unwrap_or_default();
                if (participant.commission_percent - expected).abs() > f64::EPSILON {
                    return Err(format!(
                        "participant {} holds {} but split grants {}",
                        participant.broker_id, participant.commission_percent, expected
                    ));
                }
            }
        }

        if self.partnership.status == PartnershipStatus::Active && !self.all_signed() {
            return Err("active partnership is missing signatures".to_string());
        }

        Ok(())
    }

    /// Read model without the signature tokens.
    pub fn view(&self) -> PartnershipView<'_> {
        PartnershipView {
            partnership: &self.partnership,
            participants: &self.participants,
            proposals: &self.proposals,
            all_signed: self.all_signed(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PartnershipView<'a> {
    pub partnership: &'a Partnership,
    pub participants: &'a [Participant],
    pub proposals: &'a [Proposal],
    pub all_signed: bool,
}

/// Storage abstraction scoped to one partnership per transaction.
///
/// `transact` hands the closure a working copy of the aggregate while holding that
/// partnership's lock. The copy replaces the stored record only when the closure
/// returns `Ok`; an error discards every change made to it.
pub trait AgreementStore: Send + Sync {
    fn insert(&self, record: PartnershipRecord) -> Result<PartnershipRecord, RepositoryError>;
    fn fetch(&self, id: &PartnershipId) -> Result<Option<PartnershipRecord>, RepositoryError>;
    fn partnership_for_proposal(
        &self,
        id: &ProposalId,
    ) -> Result<Option<PartnershipId>, RepositoryError>;
    /// Pending partnerships whose window closed before `now`.
    fn lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PartnershipId>, RepositoryError>;
    fn transact<T, E, F>(&self, id: &PartnershipId, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut PartnershipRecord) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("commit refused, invariant violated: {0}")]
    Invariant(String),
}
