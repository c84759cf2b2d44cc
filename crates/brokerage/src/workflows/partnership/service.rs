use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::collaborators::{
    AuditEntry, AuditSink, Clock, DirectoryError, NotificationChannel, NotificationKind, Outbox,
    PropertyDirectory, SystemClock,
};
use super::domain::{
    BrokerId, Participant, PartnershipId, PartnershipStatus, PropertyId, Proposal, ProposalId,
    ProposalStatus,
};
use super::negotiation::{self, ProposalAction, ProposalResponse, RespondOutcome};
use super::participants::{self, AdditionOutcome, ParticipantAddition};
use super::signing::{self, Credential, CredentialVerifier, SignOutcome, SigningOrigin};
use super::split::{CommissionSplit, SplitError};
use super::store::{AgreementStore, PartnershipDraft, PartnershipRecord, RepositoryError};
use super::sweeper::ExpirationSweeper;
use crate::config::PartnershipConfig;

/// Inputs for `CreatePartnership`.
#[derive(Debug, Clone)]
pub struct CreatePartnership {
    pub property_id: PropertyId,
    pub initiator: BrokerId,
    pub split: CommissionSplit,
    pub message: Option<String>,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedPartnership {
    pub partnership_id: PartnershipId,
    pub proposal_id: ProposalId,
}

/// Service composing the agreement store with the negotiation, participant, and
/// signing rules. Every mutation runs inside one store transaction.
pub struct PartnershipService<S, V> {
    store: Arc<S>,
    verifier: Arc<V>,
    properties: Arc<dyn PropertyDirectory>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    config: PartnershipConfig,
}

impl<S, V> PartnershipService<S, V>
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    pub fn new(
        store: Arc<S>,
        verifier: Arc<V>,
        properties: Arc<dyn PropertyDirectory>,
        notifier: Arc<dyn NotificationChannel>,
        audit: Arc<dyn AuditSink>,
        config: PartnershipConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            properties,
            outbox: Outbox { notifier, audit },
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sweeper sharing this service's store, clock, and outbound hooks.
    pub fn sweeper(&self) -> ExpirationSweeper<S> {
        ExpirationSweeper::new(self.store.clone(), self.outbox.clone(), self.clock.clone())
    }

    pub fn config(&self) -> &PartnershipConfig {
        &self.config
    }

    /// Open a partnership with its participants and opening proposal.
    pub fn create_partnership(
        &self,
        request: CreatePartnership,
    ) -> Result<CreatedPartnership, PartnershipServiceError> {
        let CreatePartnership {
            property_id,
            initiator,
            split,
            message,
            expires_in_days,
        } = request;

        let expires_in_days = expires_in_days.unwrap_or(self.config.default_expiry_days);
        if expires_in_days == 0 || expires_in_days > self.config.max_expiry_days {
            return Err(PartnershipServiceError::InvalidExpiry {
                days: expires_in_days,
                max: self.config.max_expiry_days,
            });
        }

        let owner = self
            .properties
            .owner_of(&property_id)?
            .ok_or_else(|| PartnershipServiceError::PropertyNotFound(property_id.clone()))?;

        let now = self.clock.now();
        let record = PartnershipRecord::create(
            PartnershipDraft {
                property_id,
                owner_broker_id: owner,
                initiator_broker_id: initiator.clone(),
                split,
                message,
                expires_in_days,
            },
            now,
        )?;
        let stored = self.store.insert(record)?;

        let created = CreatedPartnership {
            partnership_id: stored.id(),
            proposal_id: stored.proposals[0].id,
        };
        info!(
            partnership_id = %created.partnership_id,
            property_id = %stored.partnership.property_id,
            participants = stored.participants.len(),
            "partnership proposed"
        );

        self.audit(
            "partnership.created",
            created.partnership_id,
            None,
            Some(json!({
                "status": stored.partnership.status,
                "split": stored.partnership.split,
                "expires_at": stored.partnership.expires_at,
            })),
            Some(initiator.clone()),
            now,
        );
        self.notify(
            NotificationKind::PartnershipProposed,
            &stored,
            Some(&initiator),
            BTreeMap::from([(
                "proposal_id".to_string(),
                created.proposal_id.to_string(),
            )]),
        );

        Ok(created)
    }

    pub fn add_participant(
        &self,
        partnership_id: &PartnershipId,
        addition: ParticipantAddition,
    ) -> Result<AdditionOutcome, PartnershipServiceError> {
        let now = self.clock.now();
        let actor = addition.actor.clone();
        let new_broker = addition.new_broker.clone();

        let (outcome, before, after) = self.store.transact(partnership_id, |record| {
            let before = record.partnership.split.clone();
            let outcome = participants::add_participant(record, addition, now)?;
            Ok::<_, PartnershipServiceError>((outcome, before, record.clone()))
        })
        .map_err(|err| err.locate(*partnership_id))?;

        info!(
            %partnership_id,
            broker = %new_broker,
            role = %outcome.role,
            signatures_invalidated = outcome.signatures_invalidated,
            "participant added"
        );
        self.audit(
            "partnership.participant_added",
            *partnership_id,
            Some(json!({ "split": before })),
            Some(json!({
                "split": after.partnership.split,
                "broker_id": new_broker,
                "role": outcome.role,
            })),
            Some(actor.clone()),
            now,
        );
        self.notify(
            NotificationKind::ParticipantAdded,
            &after,
            Some(&actor),
            BTreeMap::from([
                ("broker_id".to_string(), new_broker.to_string()),
                ("role".to_string(), outcome.role.label()),
            ]),
        );

        Ok(outcome)
    }

    pub fn respond(
        &self,
        proposal_id: &ProposalId,
        response: ProposalResponse,
    ) -> Result<RespondOutcome, PartnershipServiceError> {
        let partnership_id = self
            .store
            .partnership_for_proposal(proposal_id)?
            .ok_or(PartnershipServiceError::ProposalNotFound(*proposal_id))?;

        let now = self.clock.now();
        let responder = response.responder.clone();
        let action = response.action;

        let (outcome, before, after) = self.store.transact(&partnership_id, |record| {
            let before = (record.partnership.status, record.partnership.split.clone());
            let outcome = negotiation::respond(record, proposal_id, response, now)?;
            Ok::<_, PartnershipServiceError>((outcome, before, record.clone()))
        })
        .map_err(|err| err.locate(partnership_id))?;

        info!(
            %partnership_id,
            %proposal_id,
            responder = %responder,
            ?action,
            status = %after.partnership.status,
            "proposal answered"
        );
        self.audit(
            match action {
                ProposalAction::Accept => "proposal.accepted",
                ProposalAction::Reject => "proposal.rejected",
                ProposalAction::Counter => "proposal.countered",
            },
            partnership_id,
            Some(json!({ "status": before.0, "split": before.1 })),
            Some(json!({
                "status": after.partnership.status,
                "split": after.partnership.split,
                "outcome": outcome,
            })),
            Some(responder.clone()),
            now,
        );

        let (kind, details) = match &outcome {
            RespondOutcome::Accepted { split_changed, .. } => (
                NotificationKind::ProposalAccepted,
                BTreeMap::from([
                    ("proposal_id".to_string(), proposal_id.to_string()),
                    ("split_changed".to_string(), split_changed.to_string()),
                ]),
            ),
            RespondOutcome::Rejected => (
                NotificationKind::PartnershipRejected,
                BTreeMap::from([("proposal_id".to_string(), proposal_id.to_string())]),
            ),
            RespondOutcome::Countered {
                proposal_id: counter,
                ..
            } => (
                NotificationKind::CounterProposed,
                BTreeMap::from([
                    ("superseded".to_string(), proposal_id.to_string()),
                    ("proposal_id".to_string(), counter.to_string()),
                ]),
            ),
        };
        self.notify(kind, &after, Some(&responder), details);

        Ok(outcome)
    }

    /// Re-verify the broker's password and record their signature.
    ///
    /// The provider round-trip happens outside the transaction; every precondition is
    /// checked again once the partnership lock is held, so terms that changed during
    /// verification are never signed.
    pub fn sign(
        &self,
        partnership_id: &PartnershipId,
        broker: &BrokerId,
        credential: &Credential,
        origin: SigningOrigin,
    ) -> Result<SignOutcome, PartnershipServiceError> {
        let snapshot = self
            .store
            .fetch(partnership_id)?
            .ok_or(PartnershipServiceError::PartnershipNotFound(*partnership_id))?;
        signing::ensure_signable(&snapshot, broker, self.clock.now())?;

        match self.verifier.verify(broker, credential) {
            Ok(true) => {}
            Ok(false) => {
                warn!(%partnership_id, %broker, "signature refused: credential mismatch");
                return Err(PartnershipServiceError::InvalidCredential);
            }
            Err(err) => {
                return Err(PartnershipServiceError::CredentialCheckUnavailable(
                    err.to_string(),
                ))
            }
        }

        let now = self.clock.now();
        let token = signing::signature_token(partnership_id, broker, credential, now);
        let ip_address = origin.ip_address;

        let (outcome, after) = self.store.transact(partnership_id, |record| {
            let outcome = signing::record_signature(record, broker, token, origin, now)?;
            Ok::<_, PartnershipServiceError>((outcome, record.clone()))
        })
        .map_err(|err| err.locate(*partnership_id))?;

        info!(
            %partnership_id,
            %broker,
            all_signed = outcome.all_signed,
            signed = after.signed_count(),
            participants = after.participants.len(),
            "contract signed"
        );
        self.audit(
            "partnership.signed",
            *partnership_id,
            None,
            Some(json!({
                "broker_id": broker,
                "ip_address": ip_address,
                "all_signed": outcome.all_signed,
            })),
            Some(broker.clone()),
            now,
        );
        self.notify(
            NotificationKind::ContractSigned,
            &after,
            Some(broker),
            BTreeMap::from([("broker_id".to_string(), broker.to_string())]),
        );

        if outcome.activated {
            info!(%partnership_id, "partnership activated");
            self.audit(
                "partnership.activated",
                *partnership_id,
                Some(json!({ "status": PartnershipStatus::Pending })),
                Some(json!({
                    "status": PartnershipStatus::Active,
                    "contract_signed_at": after.partnership.contract_signed_at,
                })),
                Some(broker.clone()),
                now,
            );
            self.notify(
                NotificationKind::PartnershipActivated,
                &after,
                None,
                BTreeMap::new(),
            );
        }

        Ok(outcome)
    }

    /// Administrative stop by the listing owner or the initiator.
    pub fn cancel(
        &self,
        partnership_id: &PartnershipId,
        actor: &BrokerId,
    ) -> Result<(), PartnershipServiceError> {
        let now = self.clock.now();
        let (before, after) = self.store.transact(partnership_id, |record| {
            let partnership = &record.partnership;
            if actor != &partnership.owner_broker_id && actor != &partnership.initiator_broker_id
            {
                return Err(PartnershipServiceError::NotAuthorizedToCancel(actor.clone()));
            }
            if !partnership.status.holds_terms() {
                return Err(PartnershipServiceError::PartnershipClosed {
                    partnership_id: partnership.id,
                    status: partnership.status,
                });
            }

            let before = partnership.status;
            record.partnership.status = PartnershipStatus::Cancelled;
            for proposal in record.proposals.iter_mut().filter(|p| p.is_pending()) {
                proposal.resolve(ProposalStatus::Rejected, now);
            }
            record.touch(now);
            Ok::<_, PartnershipServiceError>((before, record.clone()))
        })
        .map_err(|err| err.locate(*partnership_id))?;

        info!(%partnership_id, actor = %actor, previous = %before, "partnership cancelled");
        self.audit(
            "partnership.cancelled",
            *partnership_id,
            Some(json!({ "status": before })),
            Some(json!({ "status": after.partnership.status })),
            Some(actor.clone()),
            now,
        );
        self.notify(
            NotificationKind::PartnershipCancelled,
            &after,
            Some(actor),
            BTreeMap::new(),
        );
        Ok(())
    }

    pub fn get(
        &self,
        partnership_id: &PartnershipId,
    ) -> Result<PartnershipRecord, PartnershipServiceError> {
        self.store
            .fetch(partnership_id)?
            .ok_or(PartnershipServiceError::PartnershipNotFound(*partnership_id))
    }

    pub fn list_participants(
        &self,
        partnership_id: &PartnershipId,
    ) -> Result<Vec<Participant>, PartnershipServiceError> {
        Ok(self.get(partnership_id)?.participants)
    }

    pub fn list_proposals(
        &self,
        partnership_id: &PartnershipId,
    ) -> Result<Vec<Proposal>, PartnershipServiceError> {
        Ok(self.get(partnership_id)?.proposals)
    }

    fn audit(
        &self,
        action: &str,
        partnership_id: PartnershipId,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
        actor: Option<BrokerId>,
        at: DateTime<Utc>,
    ) {
        self.outbox.audit(AuditEntry {
            action: action.to_string(),
            resource_id: partnership_id.to_string(),
            old_values,
            new_values,
            actor,
            at,
        });
    }

    /// Tell every participant except the one who caused the change.
    fn notify(
        &self,
        kind: NotificationKind,
        record: &PartnershipRecord,
        actor: Option<&BrokerId>,
        details: BTreeMap<String, String>,
    ) {
        let recipients = record
            .participants
            .iter()
            .map(|participant| participant.broker_id.clone())
            .filter(|broker| Some(broker) != actor)
            .collect();
        self.outbox.notify(kind, record.id(), recipients, details);
    }
}

/// Coarse grouping callers use to decide whether to fix input, resync, or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Authorization,
    Conflict,
    NotFound,
    Infrastructure,
}

/// Error raised by the partnership service.
#[derive(Debug, thiserror::Error)]
pub enum PartnershipServiceError {
    #[error("invalid commission split: {0}")]
    InvalidSplit(#[from] SplitError),
    #[error("commission split must cover exactly {expected:?} (found {found:?})")]
    SplitMismatch {
        expected: Vec<BrokerId>,
        found: Vec<BrokerId>,
    },
    #[error("a partnership may have at most {max} participants")]
    TooManyParticipants { max: usize },
    #[error("a partnership needs at least {min} participants")]
    TooFewParticipants { min: usize },
    #[error("expiry of {days} days must be between 1 and {max}")]
    InvalidExpiry { days: u32, max: u32 },
    #[error("broker {0} already participates in this partnership")]
    AlreadyParticipant(BrokerId),
    #[error("counter-proposals must include a split")]
    MissingCounterSplit,
    #[error("credential verification failed")]
    InvalidCredential,
    #[error("broker {0} is not a participant in this partnership")]
    NotAParticipant(BrokerId),
    #[error("brokers cannot answer their own proposal {proposal_id}")]
    CannotRespondToOwnProposal { proposal_id: ProposalId },
    #[error("broker {0} may not cancel this partnership")]
    NotAuthorizedToCancel(BrokerId),
    #[error("proposal {proposal_id} is {status}, not pending")]
    ProposalNotPending {
        partnership_id: PartnershipId,
        proposal_id: ProposalId,
        status: ProposalStatus,
    },
    #[error("partnership {partnership_id} expired at {expired_at}")]
    PartnershipExpired {
        partnership_id: PartnershipId,
        expired_at: DateTime<Utc>,
    },
    #[error("partnership {partnership_id} is {status}")]
    PartnershipClosed {
        partnership_id: PartnershipId,
        status: PartnershipStatus,
    },
    #[error("proposal {proposal_id} is still open; resolve it before signing")]
    TermsUnderNegotiation {
        partnership_id: PartnershipId,
        proposal_id: ProposalId,
    },
    #[error("partnership {0} not found")]
    PartnershipNotFound(PartnershipId),
    #[error("proposal {0} not found")]
    ProposalNotFound(ProposalId),
    #[error("property {0} not found")]
    PropertyNotFound(PropertyId),
    #[error("credential check unavailable: {0}")]
    CredentialCheckUnavailable(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PartnershipServiceError {
    pub fn class(&self) -> ErrorClass {
        use PartnershipServiceError::*;
        match self {
            InvalidSplit(_)
            | SplitMismatch { .. }
            | TooManyParticipants { .. }
            | TooFewParticipants { .. }
            | InvalidExpiry { .. }
            | AlreadyParticipant(_)
            | MissingCounterSplit => ErrorClass::Validation,
            InvalidCredential
            | NotAParticipant(_)
            | CannotRespondToOwnProposal { .. }
            | NotAuthorizedToCancel(_) => ErrorClass::Authorization,
            ProposalNotPending { .. }
            | PartnershipExpired { .. }
            | PartnershipClosed { .. }
            | TermsUnderNegotiation { .. }
            | Repository(RepositoryError::Conflict) => ErrorClass::Conflict,
            PartnershipNotFound(_)
            | ProposalNotFound(_)
            | PropertyNotFound(_)
            | Repository(RepositoryError::NotFound) => ErrorClass::NotFound,
            CredentialCheckUnavailable(_)
            | Directory(_)
            | Repository(RepositoryError::Unavailable(_))
            | Repository(RepositoryError::Invariant(_)) => ErrorClass::Infrastructure,
        }
    }

    /// Whether the same request may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PartnershipServiceError::CredentialCheckUnavailable(_)
                | PartnershipServiceError::Directory(DirectoryError::Unavailable(_))
                | PartnershipServiceError::Repository(RepositoryError::Unavailable(_))
        )
    }

    /// Partnership whose current state a conflicted caller should resync from.
    pub fn partnership_id(&self) -> Option<PartnershipId> {
        match self {
            PartnershipServiceError::ProposalNotPending { partnership_id, .. }
            | PartnershipServiceError::PartnershipExpired { partnership_id, .. }
            | PartnershipServiceError::PartnershipClosed { partnership_id, .. }
            | PartnershipServiceError::TermsUnderNegotiation { partnership_id, .. } => {
                Some(*partnership_id)
            }
            PartnershipServiceError::PartnershipNotFound(id) => Some(*id),
            _ => None,
        }
    }
}

impl PartnershipServiceError {
    /// The store reports a missing aggregate generically; callers see which one.
    fn locate(self, partnership_id: PartnershipId) -> Self {
        match self {
            PartnershipServiceError::Repository(RepositoryError::NotFound) => {
                PartnershipServiceError::PartnershipNotFound(partnership_id)
            }
            other => other,
        }
    }
}
