//! Proposal lifecycle and the partnership status transitions it drives.
//!
//! ```text
//! proposal:     pending ──accept──▶ accepted
//!                  │ ├───reject──▶ rejected   (partnership → rejected)
//!                  │ └───counter─▶ superseded (new pending proposal)
//! partnership:  pending ──all signed──▶ active
//!                  ├──reject──▶ rejected
//!                  ├──sweeper / late request──▶ expired
//!                  └──cancel──▶ cancelled  (also from active)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{BrokerId, PartnershipStatus, Proposal, ProposalId, ProposalStatus};
use super::participants::{apply_split, ensure_covers, invalidate_signatures};
use super::service::PartnershipServiceError;
use super::split::CommissionSplit;
use super::store::PartnershipRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAction {
    Accept,
    Reject,
    Counter,
}

#[derive(Debug, Clone)]
pub struct ProposalResponse {
    pub responder: BrokerId,
    pub action: ProposalAction,
    pub counter_split: Option<CommissionSplit>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RespondOutcome {
    Accepted {
        split_changed: bool,
        signatures_invalidated: usize,
    },
    Rejected,
    Countered {
        superseded: ProposalId,
        proposal_id: ProposalId,
        signatures_invalidated: usize,
    },
}

/// Refuse mutation unless the partnership is still pending and inside its window.
///
/// Expiry is judged against `now` here rather than trusting the sweeper to have run.
pub(crate) fn ensure_negotiable(
    record: &PartnershipRecord,
    now: DateTime<Utc>,
) -> Result<(), PartnershipServiceError> {
    let partnership = &record.partnership;
    if partnership.is_lapsed(now) {
        return Err(PartnershipServiceError::PartnershipExpired {
            partnership_id: partnership.id,
            expired_at: partnership.expires_at,
        });
    }
    if partnership.status != PartnershipStatus::Pending {
        return Err(PartnershipServiceError::PartnershipClosed {
            partnership_id: partnership.id,
            status: partnership.status,
        });
    }
    Ok(())
}

/// Supersede whatever is pending and append a new pending proposal.
pub(crate) fn open_proposal(
    record: &mut PartnershipRecord,
    proposed_by: BrokerId,
    split: CommissionSplit,
    message: Option<String>,
    now: DateTime<Utc>,
) -> (Option<ProposalId>, ProposalId) {
    let mut superseded = None;
    for proposal in record.proposals.iter_mut().filter(|p| p.is_pending()) {
        proposal.resolve(ProposalStatus::Superseded, now);
        superseded = Some(proposal.id);
    }

    let id = ProposalId::generate();
    record.proposals.push(Proposal {
        id,
        partnership_id: record.partnership.id,
        proposed_by,
        split,
        message,
        status: ProposalStatus::Pending,
        created_at: now,
        responded_at: None,
    });
    (superseded, id)
}

/// Apply a broker's answer to a pending proposal.
pub fn respond(
    record: &mut PartnershipRecord,
    proposal_id: &ProposalId,
    response: ProposalResponse,
    now: DateTime<Utc>,
) -> Result<RespondOutcome, PartnershipServiceError> {
    let ProposalResponse {
        responder,
        action,
        counter_split,
        message,
    } = response;

    let proposal = record
        .proposal(proposal_id)
        .ok_or(PartnershipServiceError::ProposalNotFound(*proposal_id))?;
    let proposed_by = proposal.proposed_by.clone();
    let proposal_status = proposal.status;
    let proposed_split = proposal.split.clone();

    ensure_negotiable(record, now)?;
    if !record.is_participant(&responder) {
        return Err(PartnershipServiceError::NotAParticipant(responder));
    }
    if proposal_status != ProposalStatus::Pending {
        return Err(PartnershipServiceError::ProposalNotPending {
            partnership_id: record.id(),
            proposal_id: *proposal_id,
            status: proposal_status,
        });
    }
    if proposed_by == responder {
        return Err(PartnershipServiceError::CannotRespondToOwnProposal {
            proposal_id: *proposal_id,
        });
    }

    let outcome = match action {
        ProposalAction::Accept => {
            ensure_covers(record, &proposed_split, None)?;
            let split_changed = !record.partnership.split.same_terms(&proposed_split);
            let signatures_invalidated = if split_changed {
                apply_split(record, &proposed_split);
                invalidate_signatures(record, None)
            } else {
                0
            };
            mark(record, proposal_id, ProposalStatus::Accepted, now);
            RespondOutcome::Accepted {
                split_changed,
                signatures_invalidated,
            }
        }
        ProposalAction::Reject => {
            mark(record, proposal_id, ProposalStatus::Rejected, now);
            record.partnership.status = PartnershipStatus::Rejected;
            RespondOutcome::Rejected
        }
        ProposalAction::Counter => {
            let split = counter_split.ok_or(PartnershipServiceError::MissingCounterSplit)?;
            ensure_covers(record, &split, None)?;
            let signatures_invalidated = invalidate_signatures(record, None);
            let (_, counter_id) = open_proposal(record, responder, split, message, now);
            RespondOutcome::Countered {
                superseded: *proposal_id,
                proposal_id: counter_id,
                signatures_invalidated,
            }
        }
    };

    record.touch(now);
    Ok(outcome)
}

fn mark(
    record: &mut PartnershipRecord,
    proposal_id: &ProposalId,
    status: ProposalStatus,
    now: DateTime<Utc>,
) {
    if let Some(proposal) = record.proposal_mut(proposal_id) {
        proposal.resolve(status, now);
    }
}
