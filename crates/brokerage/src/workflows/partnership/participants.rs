//! Participant seating and the stale-signature cascade.

use chrono::{DateTime, Utc};

use super::domain::{BrokerId, Participant, ParticipantRole};
use super::negotiation::{ensure_negotiable, open_proposal};
use super::service::PartnershipServiceError;
use super::split::CommissionSplit;
use super::store::PartnershipRecord;

pub const MIN_PARTICIPANTS: usize = 2;
pub const MAX_PARTICIPANTS: usize = 4;

/// Request to seat another broker under a complete replacement split.
#[derive(Debug, Clone)]
pub struct ParticipantAddition {
    pub actor: BrokerId,
    pub new_broker: BrokerId,
    pub new_split: CommissionSplit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdditionOutcome {
    pub role: ParticipantRole,
    pub signatures_invalidated: usize,
}

/// Clear every participant's signed flag except `except`'s, and drop the
/// contract-signed marker. Returns how many live signatures were cleared.
///
/// This is the only place a terms change invalidates consent.
pub fn invalidate_signatures(record: &mut PartnershipRecord, except: Option<&BrokerId>) -> usize {
    let mut cleared = 0;
    for participant in &mut record.participants {
        if except == Some(&participant.broker_id) {
            continue;
        }
        if participant.clear_signature() {
            cleared += 1;
        }
    }
    record.partnership.contract_signed = false;
    record.partnership.contract_signed_at = None;
    cleared
}

/// Make `split` the partnership's terms and mirror it onto every participant.
pub(crate) fn apply_split(record: &mut PartnershipRecord, split: &CommissionSplit) {
    for participant in &mut record.participants {
        participant.commission_percent = split
            .percent_for(&participant.broker_id)
            .unwrap_or_default();
    }
    record.partnership.split = split.clone();
}

/// Lowest `partner_N` seat nobody holds yet.
pub fn next_partner_role(record: &PartnershipRecord) -> Option<ParticipantRole> {
    (1..MAX_PARTICIPANTS as u8)
        .map(ParticipantRole::Partner)
        .find(|role| {
            !record
                .participants
                .iter()
                .any(|participant| participant.role == *role)
        })
}

pub(crate) fn ensure_covers(
    record: &PartnershipRecord,
    split: &CommissionSplit,
    include: Option<&BrokerId>,
) -> Result<(), PartnershipServiceError> {
    let mut expected = record.participant_ids();
    if let Some(broker) = include {
        expected.insert(broker.clone());
    }

    let found = split.broker_set();
    if found == expected {
        Ok(())
    } else {
        Err(PartnershipServiceError::SplitMismatch {
            expected: expected.into_iter().collect(),
            found: found.into_iter().collect(),
        })
    }
}

/// Seat a new broker and re-base everyone's commission on `new_split`.
///
/// The new terms are recorded as the pending proposal (superseding any other), so
/// the negotiation history always explains the current split. Every signer other
/// than the actor has to sign again.
pub fn add_participant(
    record: &mut PartnershipRecord,
    addition: ParticipantAddition,
    now: DateTime<Utc>,
) -> Result<AdditionOutcome, PartnershipServiceError> {
    let ParticipantAddition {
        actor,
        new_broker,
        new_split,
    } = addition;

    ensure_negotiable(record, now)?;
    if !record.is_participant(&actor) {
        return Err(PartnershipServiceError::NotAParticipant(actor));
    }
    if record.is_participant(&new_broker) {
        return Err(PartnershipServiceError::AlreadyParticipant(new_broker));
    }
    if record.participants.len() >= MAX_PARTICIPANTS {
        return Err(PartnershipServiceError::TooManyParticipants {
            max: MAX_PARTICIPANTS,
        });
    }
    ensure_covers(record, &new_split, Some(&new_broker))?;

    let role = next_partner_role(record).ok_or(PartnershipServiceError::TooManyParticipants {
        max: MAX_PARTICIPANTS,
    })?;

    record.participants.push(Participant {
        broker_id: new_broker.clone(),
        role,
        commission_percent: 0.0,
        signed: false,
        signed_at: None,
        signature_ip: None,
        added_by: actor.clone(),
        joined_at: now,
    });
    apply_split(record, &new_split);
    let signatures_invalidated = invalidate_signatures(record, Some(&actor));

    open_proposal(
        record,
        actor,
        new_split,
        Some(format!("added {new_broker} as {role}")),
        now,
    );
    record.touch(now);

    Ok(AdditionOutcome {
        role,
        signatures_invalidated,
    })
}
