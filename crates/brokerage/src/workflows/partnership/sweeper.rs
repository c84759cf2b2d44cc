use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::collaborators::{AuditEntry, Clock, NotificationKind, Outbox};
use super::domain::{BrokerId, PartnershipId, PartnershipStatus};
use super::store::{AgreementStore, PartnershipRecord, RepositoryError};

const DEFAULT_BATCH: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: Vec<PartnershipId>,
}

/// Move a pending record past its window to `expired`. Returns whether it changed.
pub fn expire_if_due(record: &mut PartnershipRecord, now: DateTime<Utc>) -> bool {
    let partnership = &mut record.partnership;
    if partnership.status == PartnershipStatus::Pending && partnership.expires_at < now {
        partnership.status = PartnershipStatus::Expired;
        partnership.updated_at = now;
        true
    } else {
        false
    }
}

/// Periodic transition of lapsed negotiations to `expired`.
pub struct ExpirationSweeper<S> {
    store: Arc<S>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl<S> ExpirationSweeper<S>
where
    S: AgreementStore + 'static,
{
    pub(crate) fn new(store: Arc<S>, outbox: Outbox, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            outbox,
            clock,
            batch_size: DEFAULT_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass over pending partnerships; each expiry commits in its own transaction.
    pub fn sweep(&self) -> Result<SweepReport, RepositoryError> {
        let now = self.clock.now();
        let candidates = self.store.lapsed(now, self.batch_size)?;
        let mut report = SweepReport {
            examined: candidates.len(),
            expired: Vec::new(),
        };

        for id in candidates {
            let outcome = self.store.transact(&id, |record| {
                let participants: Vec<_> = record
                    .participants
                    .iter()
                    .map(|participant| participant.broker_id.clone())
                    .collect();
                let expires_at = record.partnership.expires_at;
                Ok::<_, RepositoryError>(
                    expire_if_due(record, now).then_some((participants, expires_at)),
                )
            });

            match outcome {
                Ok(Some((participants, expires_at))) => {
                    self.announce(id, participants, expires_at, now);
                    report.expired.push(id);
                }
                Ok(None) => {}
                Err(RepositoryError::NotFound) => {
                    debug!(partnership_id = %id, "partnership vanished during sweep");
                }
                Err(err) => return Err(err),
            }
        }

        if !report.expired.is_empty() {
            info!(
                examined = report.examined,
                expired = report.expired.len(),
                "expired lapsed partnerships"
            );
        }
        Ok(report)
    }

    fn announce(
        &self,
        id: PartnershipId,
        participants: Vec<BrokerId>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.outbox.audit(AuditEntry {
            action: "partnership.expired".to_string(),
            resource_id: id.to_string(),
            old_values: Some(serde_json::json!({ "status": PartnershipStatus::Pending })),
            new_values: Some(serde_json::json!({ "status": PartnershipStatus::Expired })),
            actor: None,
            at: now,
        });

        let mut details = BTreeMap::new();
        details.insert("expired_at".to_string(), expires_at.to_rfc3339());
        self.outbox
            .notify(NotificationKind::PartnershipExpired, id, participants, details);
    }

    /// Sweep forever on `period`. Errors are logged and the next tick retries.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep() {
                warn!(error = %err, "expiration sweep failed");
            }
        }
    }
}
