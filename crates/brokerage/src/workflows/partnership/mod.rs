//! Co-listing partnership negotiation between brokers.
//!
//! A partnership binds two to four brokers to a commission split on one listing.
//! Terms are negotiated through proposals, locked in by every participant
//! re-authenticating to sign, and lapse automatically when the window closes.

pub mod collaborators;
pub mod domain;
pub mod memory;
pub mod negotiation;
pub mod participants;
pub mod router;
pub mod service;
pub mod signing;
pub mod split;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod tests;

pub use collaborators::{
    AuditEntry, AuditError, AuditSink, Clock, DirectoryError, NotificationChannel,
    NotificationError, NotificationKind, PartnershipNotification, PropertyDirectory, SystemClock,
};
pub use domain::{
    BrokerId, Participant, ParticipantRole, Partnership, PartnershipId, PartnershipStatus,
    PropertyId, Proposal, ProposalId, ProposalStatus, Signature,
};
pub use memory::InMemoryAgreementStore;
pub use negotiation::{ProposalAction, ProposalResponse, RespondOutcome};
pub use participants::{AdditionOutcome, ParticipantAddition, MAX_PARTICIPANTS, MIN_PARTICIPANTS};
pub use router::partnership_router;
pub use service::{
    CreatePartnership, CreatedPartnership, ErrorClass, PartnershipService,
    PartnershipServiceError,
};
pub use signing::{Credential, CredentialVerifier, SignOutcome, SigningOrigin, VerifierError};
pub use split::{CommissionSplit, SplitError, SPLIT_TOLERANCE};
pub use store::{AgreementStore, PartnershipRecord, PartnershipView, RepositoryError};
pub use sweeper::{ExpirationSweeper, SweepReport};
