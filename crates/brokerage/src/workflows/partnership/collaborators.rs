use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{BrokerId, PartnershipId, PropertyId};

/// Listing lookup used to resolve who owns the property being co-listed.
pub trait PropertyDirectory: Send + Sync {
    fn owner_of(&self, property: &PropertyId) -> Result<Option<BrokerId>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("listing directory unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget channel informing participants of status changes.
pub trait NotificationChannel: Send + Sync {
    fn notify(&self, notification: PartnershipNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PartnershipProposed,
    ParticipantAdded,
    CounterProposed,
    ProposalAccepted,
    PartnershipRejected,
    ContractSigned,
    PartnershipActivated,
    PartnershipExpired,
    PartnershipCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipNotification {
    pub kind: NotificationKind,
    pub partnership_id: PartnershipId,
    pub recipients: Vec<BrokerId>,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Best-effort audit trail sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub resource_id: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub actor: Option<BrokerId>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink rejected entry: {0}")]
    Rejected(String),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Outbound hooks whose failures are logged and swallowed.
#[derive(Clone)]
pub(crate) struct Outbox {
    pub(crate) notifier: std::sync::Arc<dyn NotificationChannel>,
    pub(crate) audit: std::sync::Arc<dyn AuditSink>,
}

impl Outbox {
    pub(crate) fn notify(
        &self,
        kind: NotificationKind,
        partnership_id: PartnershipId,
        recipients: Vec<BrokerId>,
        details: BTreeMap<String, String>,
    ) {
        let notification = PartnershipNotification {
            kind,
            partnership_id,
            recipients,
            details,
        };
        if let Err(err) = self.notifier.notify(notification) {
            warn!(%partnership_id, ?kind, error = %err, "partnership notification dropped");
        }
    }

    pub(crate) fn audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        let resource_id = entry.resource_id.clone();
        if let Err(err) = self.audit.record(entry) {
            warn!(%action, %resource_id, error = %err, "audit entry dropped");
        }
    }
}
