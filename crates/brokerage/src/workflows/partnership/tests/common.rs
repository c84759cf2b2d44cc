use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::to_bytes;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::config::PartnershipConfig;
use crate::workflows::partnership::collaborators::{
    AuditEntry, AuditError, AuditSink, Clock, DirectoryError, NotificationChannel,
    NotificationError, NotificationKind, PartnershipNotification, PropertyDirectory,
};
use crate::workflows::partnership::domain::{BrokerId, PropertyId};
use crate::workflows::partnership::memory::InMemoryAgreementStore;
use crate::workflows::partnership::service::{
    CreatePartnership, CreatedPartnership, PartnershipService,
};
use crate::workflows::partnership::signing::{Credential, CredentialVerifier, VerifierError};
use crate::workflows::partnership::split::CommissionSplit;
use crate::workflows::partnership::store::{PartnershipDraft, PartnershipRecord};

pub(crate) const PASSWORD: &str = "correct-horse";
pub(crate) const PROPERTY: &str = "prop-1";

pub(crate) fn broker(id: &str) -> BrokerId {
    BrokerId::from(id)
}

pub(crate) fn split(entries: &[(&str, f64)]) -> CommissionSplit {
    CommissionSplit::new(entries.iter().map(|(id, pct)| (broker(id), *pct)))
        .expect("test split is valid")
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Fresh pending record on `prop-1`, owned by `owner`, with a seven day window.
pub(crate) fn record_with(entries: &[(&str, f64)], initiator: &str) -> PartnershipRecord {
    PartnershipRecord::create(
        PartnershipDraft {
            property_id: PropertyId(PROPERTY.to_string()),
            owner_broker_id: broker("owner"),
            initiator_broker_id: broker(initiator),
            split: split(entries),
            message: Some("co-list the loft?".to_string()),
            expires_in_days: 7,
        },
        now(),
    )
    .expect("test record is valid")
}

pub(crate) fn credential() -> Credential {
    Credential::new(PASSWORD)
}

pub(crate) struct ManualClock {
    at: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn starting_at(at: DateTime<Utc>) -> Self {
        Self { at: Mutex::new(at) }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut at = self.at.lock().expect("clock lock");
        *at += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.at.lock().expect("clock lock")
    }
}

/// Accepts `PASSWORD` for every broker and counts provider calls.
#[derive(Default)]
pub(crate) struct StaticVerifier {
    calls: Mutex<usize>,
}

impl StaticVerifier {
    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().expect("verifier lock")
    }
}

impl CredentialVerifier for StaticVerifier {
    fn verify(&self, _broker: &BrokerId, credential: &Credential) -> Result<bool, VerifierError> {
        *self.calls.lock().expect("verifier lock") += 1;
        Ok(credential.expose() == PASSWORD)
    }
}

pub(crate) struct UnavailableVerifier;

impl CredentialVerifier for UnavailableVerifier {
    fn verify(&self, _broker: &BrokerId, _credential: &Credential) -> Result<bool, VerifierError> {
        Err(VerifierError::Unavailable("identity provider timed out".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    events: Mutex<Vec<PartnershipNotification>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<PartnershipNotification> {
        self.events.lock().expect("notifier lock").clone()
    }

    pub(crate) fn kinds(&self) -> Vec<NotificationKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl NotificationChannel for RecordingNotifier {
    fn notify(&self, notification: PartnershipNotification) -> Result<(), NotificationError> {
        self.events.lock().expect("notifier lock").push(notification);
        Ok(())
    }
}

pub(crate) struct FailingNotifier;

impl NotificationChannel for FailingNotifier {
    fn notify(&self, _notification: PartnershipNotification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay refused".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub(crate) fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock").clone()
    }

    pub(crate) fn actions(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().expect("audit lock").push(entry);
        Ok(())
    }
}

pub(crate) struct FailingAudit;

impl AuditSink for FailingAudit {
    fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::Rejected("audit table locked".to_string()))
    }
}

pub(crate) struct MemoryDirectory {
    owners: HashMap<PropertyId, BrokerId>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        let mut owners = HashMap::new();
        owners.insert(PropertyId(PROPERTY.to_string()), broker("owner"));
        Self { owners }
    }
}

impl PropertyDirectory for MemoryDirectory {
    fn owner_of(&self, property: &PropertyId) -> Result<Option<BrokerId>, DirectoryError> {
        Ok(self.owners.get(property).cloned())
    }
}

pub(crate) struct UnavailableDirectory;

impl PropertyDirectory for UnavailableDirectory {
    fn owner_of(&self, _property: &PropertyId) -> Result<Option<BrokerId>, DirectoryError> {
        Err(DirectoryError::Unavailable("listing service down".to_string()))
    }
}

pub(crate) type TestService = PartnershipService<InMemoryAgreementStore, StaticVerifier>;

pub(crate) struct Harness {
    pub(crate) service: Arc<TestService>,
    pub(crate) store: Arc<InMemoryAgreementStore>,
    pub(crate) verifier: Arc<StaticVerifier>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) audit: Arc<RecordingAudit>,
}

pub(crate) fn harness() -> Harness {
    let store = Arc::new(InMemoryAgreementStore::default());
    let verifier = Arc::new(StaticVerifier::default());
    let clock = Arc::new(ManualClock::starting_at(now()));
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAudit::default());

    let service = PartnershipService::new(
        store.clone(),
        verifier.clone(),
        Arc::new(MemoryDirectory::default()),
        notifier.clone(),
        audit.clone(),
        PartnershipConfig::default(),
    )
    .with_clock(clock.clone());

    Harness {
        service: Arc::new(service),
        store,
        verifier,
        clock,
        notifier,
        audit,
    }
}

pub(crate) fn create_request(entries: &[(&str, f64)], initiator: &str) -> CreatePartnership {
    CreatePartnership {
        property_id: PropertyId(PROPERTY.to_string()),
        initiator: broker(initiator),
        split: split(entries),
        message: None,
        expires_in_days: None,
    }
}

impl Harness {
    pub(crate) fn create(&self, entries: &[(&str, f64)], initiator: &str) -> CreatedPartnership {
        self.service
            .create_partnership(create_request(entries, initiator))
            .expect("partnership created")
    }
}

pub(crate) async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
