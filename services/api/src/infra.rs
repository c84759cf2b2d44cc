use brokerage::config::PartnershipConfig;
use brokerage::workflows::partnership::{
    AuditEntry, AuditError, AuditSink, BrokerId, Clock, Credential, CredentialVerifier,
    DirectoryError, InMemoryAgreementStore, NotificationChannel, NotificationError,
    PartnershipNotification, PartnershipService, PropertyDirectory, PropertyId, SystemClock,
    VerifierError,
};
use chrono::{DateTime, Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use tracing::info;

pub(crate) type ApiService = PartnershipService<InMemoryAgreementStore, InMemoryCredentials>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Listings the demo and local server can negotiate over.
pub(crate) const DEMO_LISTINGS: [(&str, &str); 3] = [
    ("mls-1001", "harbor-realty"),
    ("mls-1002", "summit-homes"),
    ("mls-1003", "lakeside-group"),
];

pub(crate) const DEMO_BROKERS: [(&str, &str); 4] = [
    ("harbor-realty", "harbor-pass"),
    ("summit-homes", "summit-pass"),
    ("lakeside-group", "lakeside-pass"),
    ("ridgeline-partners", "ridgeline-pass"),
];

#[derive(Default, Clone)]
pub(crate) struct InMemoryListings {
    owners: Arc<RwLock<HashMap<PropertyId, BrokerId>>>,
}

impl InMemoryListings {
    pub(crate) fn seeded() -> Self {
        let listings = Self::default();
        for (property, owner) in DEMO_LISTINGS {
            listings.register(PropertyId(property.to_string()), BrokerId::from(owner));
        }
        listings
    }

    pub(crate) fn register(&self, property: PropertyId, owner: BrokerId) {
        if let Ok(mut guard) = self.owners.write() {
            guard.insert(property, owner);
        }
    }
}

impl PropertyDirectory for InMemoryListings {
    fn owner_of(&self, property: &PropertyId) -> Result<Option<BrokerId>, DirectoryError> {
        let guard = self
            .owners
            .read()
            .map_err(|_| DirectoryError::Unavailable("listing index poisoned".to_string()))?;
        Ok(guard.get(property).cloned())
    }
}

/// Password table standing in for the identity provider.
#[derive(Default, Clone)]
pub(crate) struct InMemoryCredentials {
    passwords: Arc<RwLock<HashMap<BrokerId, String>>>,
}

impl InMemoryCredentials {
    pub(crate) fn seeded() -> Self {
        let credentials = Self::default();
        for (broker, password) in DEMO_BROKERS {
            credentials.enroll(BrokerId::from(broker), password);
        }
        credentials
    }

    pub(crate) fn enroll(&self, broker: BrokerId, password: &str) {
        if let Ok(mut guard) = self.passwords.write() {
            guard.insert(broker, password.to_string());
        }
    }
}

impl CredentialVerifier for InMemoryCredentials {
    fn verify(&self, broker: &BrokerId, credential: &Credential) -> Result<bool, VerifierError> {
        let guard = self
            .passwords
            .read()
            .map_err(|_| VerifierError::Unavailable("credential table poisoned".to_string()))?;
        Ok(guard
            .get(broker)
            .is_some_and(|password| password == credential.expose()))
    }
}

/// Notification channel that only logs; delivery is someone else's job.
#[derive(Default, Clone, Copy)]
pub(crate) struct TracingNotifier;

impl NotificationChannel for TracingNotifier {
    fn notify(&self, notification: PartnershipNotification) -> Result<(), NotificationError> {
        info!(
            kind = ?notification.kind,
            partnership_id = %notification.partnership_id,
            recipients = notification.recipients.len(),
            "partnership notification"
        );
        Ok(())
    }
}

#[derive(Default, Clone, Copy)]
pub(crate) struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let new_values = entry
            .new_values
            .as_ref()
            .map(|value| value.to_string())
            .unwrap_or_default();
        info!(
            target: "audit",
            action = %entry.action,
            resource_id = %entry.resource_id,
            actor = entry.actor.as_ref().map(|actor| actor.0.as_str()),
            %new_values,
            "audit"
        );
        Ok(())
    }
}

/// Wall clock that can be pushed forward, for sweeping "as of" a later moment.
pub(crate) struct ShiftableClock {
    offset: RwLock<Duration>,
}

impl ShiftableClock {
    pub(crate) fn new() -> Self {
        Self {
            offset: RwLock::new(Duration::zero()),
        }
    }

    pub(crate) fn shift(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.write() {
            *offset += by;
        }
    }
}

impl Clock for ShiftableClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = self
            .offset
            .read()
            .map(|offset| *offset)
            .unwrap_or_else(|_| Duration::zero());
        SystemClock.now() + offset
    }
}

pub(crate) fn build_service(config: PartnershipConfig, clock: Arc<dyn Clock>) -> Arc<ApiService> {
    let service = PartnershipService::new(
        Arc::new(InMemoryAgreementStore::default()),
        Arc::new(InMemoryCredentials::seeded()),
        Arc::new(InMemoryListings::seeded()),
        Arc::new(TracingNotifier),
        Arc::new(TracingAuditSink),
        config,
    )
    .with_clock(clock);
    Arc::new(service)
}
