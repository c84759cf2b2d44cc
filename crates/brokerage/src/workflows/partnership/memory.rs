use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::domain::{PartnershipId, PartnershipStatus, ProposalId};
use super::store::{AgreementStore, PartnershipRecord, RepositoryError};

type Slot = Arc<Mutex<PartnershipRecord>>;

/// Process-local agreement store with one lock per partnership.
///
/// Operations on different partnerships never wait on each other; the map lock is
/// only held long enough to find or insert a slot.
#[derive(Default)]
pub struct InMemoryAgreementStore {
    partnerships: RwLock<HashMap<PartnershipId, Slot>>,
    proposals: RwLock<HashMap<ProposalId, PartnershipId>>,
}

fn poisoned(what: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("{what} lock poisoned"))
}

impl InMemoryAgreementStore {
    fn slot(&self, id: &PartnershipId) -> Result<Option<Slot>, RepositoryError> {
        let guard = self
            .partnerships
            .read()
            .map_err(|_| poisoned("partnership index"))?;
        Ok(guard.get(id).cloned())
    }

    fn index_proposals(&self, record: &PartnershipRecord) -> Result<(), RepositoryError> {
        let mut index = self
            .proposals
            .write()
            .map_err(|_| poisoned("proposal index"))?;
        for proposal in &record.proposals {
            index.insert(proposal.id, record.id());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.partnerships
            .read()
            .map(|guard| guard.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AgreementStore for InMemoryAgreementStore {
    fn insert(&self, record: PartnershipRecord) -> Result<PartnershipRecord, RepositoryError> {
        record.check_invariants().map_err(RepositoryError::Invariant)?;

        {
            let mut guard = self
                .partnerships
                .write()
                .map_err(|_| poisoned("partnership index"))?;
            if guard.contains_key(&record.id()) {
                return Err(RepositoryError::Conflict);
            }
            guard.insert(record.id(), Arc::new(Mutex::new(record.clone())));
        }

        self.index_proposals(&record)?;
        Ok(record)
    }

    fn fetch(&self, id: &PartnershipId) -> Result<Option<PartnershipRecord>, RepositoryError> {
        let Some(slot) = self.slot(id)? else {
            return Ok(None);
        };
        let record = slot.lock().map_err(|_| poisoned("partnership"))?;
        Ok(Some(record.clone()))
    }

    fn partnership_for_proposal(
        &self,
        id: &ProposalId,
    ) -> Result<Option<PartnershipId>, RepositoryError> {
        let index = self
            .proposals
            .read()
            .map_err(|_| poisoned("proposal index"))?;
        Ok(index.get(id).copied())
    }

    fn lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PartnershipId>, RepositoryError> {
        let slots: Vec<Slot> = {
            let guard = self
                .partnerships
                .read()
                .map_err(|_| poisoned("partnership index"))?;
            guard.values().cloned().collect()
        };

        let mut lapsed = Vec::new();
        for slot in slots {
            if lapsed.len() >= limit {
                break;
            }
            let record = slot.lock().map_err(|_| poisoned("partnership"))?;
            let partnership = &record.partnership;
            if partnership.status == PartnershipStatus::Pending && partnership.expires_at < now {
                lapsed.push(partnership.id);
            }
        }
        Ok(lapsed)
    }

    fn transact<T, E, F>(&self, id: &PartnershipId, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut PartnershipRecord) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let slot = self.slot(id)?.ok_or(RepositoryError::NotFound)?;
        let mut stored = slot.lock().map_err(|_| poisoned("partnership"))?;

        let mut working = stored.clone();
        let value = work(&mut working)?;

        working
            .check_invariants()
            .map_err(RepositoryError::Invariant)?;
        working.partnership.version = stored.partnership.version + 1;

        self.index_proposals(&working)?;
        *stored = working;
        Ok(value)
    }
}
