use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use super::common::*;
use crate::config::PartnershipConfig;
use crate::workflows::partnership::domain::{BrokerId, PartnershipStatus, ProposalStatus};
use crate::workflows::partnership::memory::InMemoryAgreementStore;
use crate::workflows::partnership::negotiation::{self, ProposalAction, ProposalResponse};
use crate::workflows::partnership::service::{
    CreatedPartnership, ErrorClass, PartnershipService, PartnershipServiceError,
};
use crate::workflows::partnership::signing::{
    Credential, CredentialVerifier, SigningOrigin, VerifierError,
};
use crate::workflows::partnership::store::AgreementStore;

/// Commits an owner counter-proposal while the signer's password is being checked.
struct CounterDuringVerification {
    store: Arc<InMemoryAgreementStore>,
    target: Mutex<Option<CreatedPartnership>>,
}

impl CredentialVerifier for CounterDuringVerification {
    fn verify(&self, _broker: &BrokerId, credential: &Credential) -> Result<bool, VerifierError> {
        if let Some(created) = self.target.lock().expect("target lock").take() {
            self.store
                .transact(&created.partnership_id, |record| {
                    negotiation::respond(
                        record,
                        &created.proposal_id,
                        ProposalResponse {
                            responder: broker("owner"),
                            action: ProposalAction::Counter,
                            counter_split: Some(split(&[("owner", 50.0), ("alpha", 50.0)])),
                            message: None,
                        },
                        now(),
                    )
                })
                .expect("counter commits mid-verification");
        }
        Ok(credential.expose() == PASSWORD)
    }
}

#[test]
fn counter_during_verification_blocks_the_signature() {
    let store = Arc::new(InMemoryAgreementStore::default());
    let verifier = Arc::new(CounterDuringVerification {
        store: store.clone(),
        target: Mutex::new(None),
    });
    let service = PartnershipService::new(
        store.clone(),
        verifier.clone(),
        Arc::new(MemoryDirectory::default()),
        Arc::new(RecordingNotifier::default()),
        Arc::new(RecordingAudit::default()),
        PartnershipConfig::default(),
    )
    .with_clock(Arc::new(ManualClock::starting_at(now())));

    let created = service
        .create_partnership(create_request(&[("owner", 60.0), ("alpha", 40.0)], "alpha"))
        .expect("partnership created");
    let id = created.partnership_id;
    *verifier.target.lock().expect("target lock") = Some(created);

    let err = service
        .sign(&id, &broker("alpha"), &credential(), SigningOrigin::default())
        .expect_err("terms moved while the password was checked");
    assert!(matches!(
        err,
        PartnershipServiceError::TermsUnderNegotiation { .. }
    ));
    assert_eq!(err.class(), ErrorClass::Conflict);

    let record = service.get(&id).unwrap();
    let alpha = record.participant(&broker("alpha")).expect("alpha seated");
    assert!(!alpha.signed);
    assert!(record.signatures.is_empty());
    let pending = record.pending_proposal().expect("counter is pending");
    assert_eq!(pending.proposed_by, broker("owner"));
    assert!(pending.split.same_terms(&split(&[("owner", 50.0), ("alpha", 50.0)])));
    assert!(record
        .partnership
        .split
        .same_terms(&split(&[("owner", 60.0), ("alpha", 40.0)])));
    record.check_invariants().expect("record stays consistent");
}

#[test]
fn racing_counters_leave_one_pending_proposal() {
    let h = harness();
    let created = h.create(
        &[("owner", 50.0), ("alpha", 30.0), ("bravo", 20.0)],
        "alpha",
    );
    let counters = [
        ("owner", [("owner", 60.0), ("alpha", 25.0), ("bravo", 15.0)]),
        ("bravo", [("owner", 45.0), ("alpha", 30.0), ("bravo", 25.0)]),
    ];
    let barrier = Barrier::new(counters.len());

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = counters
            .iter()
            .map(|(who, entries)| {
                let service = &h.service;
                let barrier = &barrier;
                let proposal_id = created.proposal_id;
                scope.spawn(move || {
                    barrier.wait();
                    service.respond(
                        &proposal_id,
                        ProposalResponse {
                            responder: broker(who),
                            action: ProposalAction::Counter,
                            counter_split: Some(split(entries)),
                            message: None,
                        },
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    let won = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(won, 1, "exactly one counter lands: {results:?}");
    let lost = results
        .into_iter()
        .find_map(Result::err)
        .expect("the other counter is refused");
    assert!(matches!(lost, PartnershipServiceError::ProposalNotPending { .. }));
    assert_eq!(lost.class(), ErrorClass::Conflict);

    let record = h.service.get(&created.partnership_id).unwrap();
    let pending = record.proposals.iter().filter(|p| p.is_pending()).count();
    assert_eq!(pending, 1);
    assert_eq!(record.proposals[0].status, ProposalStatus::Superseded);
    record.check_invariants().expect("record stays consistent");
}

#[test]
fn parallel_signers_activate_exactly_once() {
    let h = harness();
    let brokers = ["owner", "alpha", "bravo", "charlie"];
    let created = h.create(
        &[
            ("owner", 25.0),
            ("alpha", 25.0),
            ("bravo", 25.0),
            ("charlie", 25.0),
        ],
        "alpha",
    );
    let barrier = Barrier::new(brokers.len());

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = brokers
            .iter()
            .map(|who| {
                let service = &h.service;
                let barrier = &barrier;
                let id = created.partnership_id;
                scope.spawn(move || {
                    barrier.wait();
                    service.sign(&id, &broker(who), &credential(), SigningOrigin::default())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    let outcomes: Vec<_> = outcomes
        .into_iter()
        .map(|outcome| outcome.expect("every signer succeeds"))
        .collect();
    assert_eq!(outcomes.iter().filter(|outcome| outcome.activated).count(), 1);

    let record = h.service.get(&created.partnership_id).unwrap();
    assert_eq!(record.partnership.status, PartnershipStatus::Active);
    assert!(record.all_signed());
    assert_eq!(record.signatures.len(), brokers.len());
    assert_eq!(record.partnership.version, brokers.len() as u64);
}
