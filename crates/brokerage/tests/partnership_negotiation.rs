//! End-to-end negotiation scenarios driven through the public service facade.

mod common {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use brokerage::config::PartnershipConfig;
    use brokerage::workflows::partnership::{
        AuditEntry, AuditError, AuditSink, BrokerId, Clock, CommissionSplit, Credential,
        CredentialVerifier, DirectoryError, InMemoryAgreementStore, NotificationChannel,
        NotificationError, PartnershipNotification, PartnershipService, PropertyDirectory,
        PropertyId, VerifierError,
    };

    pub(super) struct Clockwork(Mutex<DateTime<Utc>>);

    impl Clockwork {
        pub(super) fn advance(&self, by: Duration) {
            *self.0.lock().expect("clock") += by;
        }
    }

    impl Clock for Clockwork {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().expect("clock")
        }
    }

    /// Each broker's password is their id reversed.
    pub(super) struct ReversedIdVerifier;

    impl CredentialVerifier for ReversedIdVerifier {
        fn verify(&self, broker: &BrokerId, credential: &Credential) -> Result<bool, VerifierError> {
            Ok(credential.expose() == password_for(&broker.0))
        }
    }

    pub(super) fn password_for(broker: &str) -> String {
        broker.chars().rev().collect()
    }

    pub(super) struct Listings(pub(super) HashMap<PropertyId, BrokerId>);

    impl PropertyDirectory for Listings {
        fn owner_of(&self, property: &PropertyId) -> Result<Option<BrokerId>, DirectoryError> {
            Ok(self.0.get(property).cloned())
        }
    }

    #[derive(Default)]
    pub(super) struct Inbox(pub(super) Mutex<Vec<PartnershipNotification>>);

    impl NotificationChannel for Inbox {
        fn notify(&self, notification: PartnershipNotification) -> Result<(), NotificationError> {
            self.0.lock().expect("inbox").push(notification);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(super) struct Ledger(pub(super) Mutex<Vec<AuditEntry>>);

    impl AuditSink for Ledger {
        fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
            self.0.lock().expect("ledger").push(entry);
            Ok(())
        }
    }

    pub(super) struct World {
        pub(super) service: PartnershipService<InMemoryAgreementStore, ReversedIdVerifier>,
        pub(super) clock: Arc<Clockwork>,
        pub(super) inbox: Arc<Inbox>,
        pub(super) ledger: Arc<Ledger>,
    }

    pub(super) fn world() -> World {
        let clock = Arc::new(Clockwork(Mutex::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 14, 30, 0)
                .single()
                .expect("valid timestamp"),
        )));
        let inbox = Arc::new(Inbox::default());
        let ledger = Arc::new(Ledger::default());
        let listings = Listings(HashMap::from([(
            PropertyId("mls-5521".to_string()),
            BrokerId::from("harbor-realty"),
        )]));

        let service = PartnershipService::new(
            Arc::new(InMemoryAgreementStore::default()),
            Arc::new(ReversedIdVerifier),
            Arc::new(listings),
            inbox.clone(),
            ledger.clone(),
            PartnershipConfig::default(),
        )
        .with_clock(clock.clone());

        World {
            service,
            clock,
            inbox,
            ledger,
        }
    }

    pub(super) fn split(entries: &[(&str, f64)]) -> CommissionSplit {
        CommissionSplit::new(entries.iter().map(|(id, pct)| (BrokerId::from(*id), *pct)))
            .expect("valid split")
    }
}

use chrono::Duration;

use brokerage::workflows::partnership::{
    BrokerId, CreatePartnership, Credential, NotificationKind, ParticipantAddition,
    PartnershipServiceError, PartnershipStatus, PropertyId, ProposalAction, ProposalResponse,
    ProposalStatus, RespondOutcome, SigningOrigin,
};
use common::*;

fn sign(world: &World, id: &brokerage::workflows::partnership::PartnershipId, who: &str) {
    world
        .service
        .sign(
            id,
            &BrokerId::from(who),
            &Credential::new(password_for(who)),
            SigningOrigin::default(),
        )
        .unwrap_or_else(|err| panic!("{who} could not sign: {err}"));
}

#[test]
fn three_brokers_negotiate_and_activate() {
    let world = world();
    let created = world
        .service
        .create_partnership(CreatePartnership {
            property_id: PropertyId("mls-5521".to_string()),
            initiator: BrokerId::from("summit-homes"),
            split: split(&[("harbor-realty", 60.0), ("summit-homes", 40.0)]),
            message: Some("Buyer pool overlap on the waterfront units".to_string()),
            expires_in_days: Some(14),
        })
        .expect("partnership proposed");
    let id = created.partnership_id;

    // Owner signs the opening terms straight away.
    sign(&world, &id, "harbor-realty");

    world
        .service
        .add_participant(
            &id,
            ParticipantAddition {
                actor: BrokerId::from("summit-homes"),
                new_broker: BrokerId::from("lakeside-group"),
                new_split: split(&[
                    ("harbor-realty", 50.0),
                    ("summit-homes", 30.0),
                    ("lakeside-group", 20.0),
                ]),
            },
        )
        .expect("third broker seated");
    let record = world.service.get(&id).unwrap();
    assert_eq!(record.signed_count(), 0, "owner must re-sign the new terms");
    let pending = record.pending_proposal().expect("new terms pending").id;

    let countered = world
        .service
        .respond(
            &pending,
            ProposalResponse {
                responder: BrokerId::from("harbor-realty"),
                action: ProposalAction::Counter,
                counter_split: Some(split(&[
                    ("harbor-realty", 55.0),
                    ("summit-homes", 27.5),
                    ("lakeside-group", 17.5),
                ])),
                message: None,
            },
        )
        .expect("owner counters");
    let RespondOutcome::Countered { proposal_id, .. } = countered else {
        panic!("expected counter, got {countered:?}");
    };

    world
        .service
        .respond(
            &proposal_id,
            ProposalResponse {
                responder: BrokerId::from("lakeside-group"),
                action: ProposalAction::Accept,
                counter_split: None,
                message: None,
            },
        )
        .expect("lakeside accepts");

    for who in ["harbor-realty", "summit-homes", "lakeside-group"] {
        sign(&world, &id, who);
    }

    let record = world.service.get(&id).unwrap();
    assert_eq!(record.partnership.status, PartnershipStatus::Active);
    assert!(record.all_signed());
    assert_eq!(
        record
            .partnership
            .split
            .percent_for(&BrokerId::from("summit-homes")),
        Some(27.5)
    );
    let statuses: Vec<ProposalStatus> = record.proposals.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProposalStatus::Superseded,
            ProposalStatus::Superseded,
            ProposalStatus::Accepted
        ]
    );

    let kinds: Vec<NotificationKind> = world
        .inbox
        .0
        .lock()
        .unwrap()
        .iter()
        .map(|event| event.kind)
        .collect();
    assert_eq!(kinds.first(), Some(&NotificationKind::PartnershipProposed));
    assert_eq!(kinds.last(), Some(&NotificationKind::PartnershipActivated));
    assert!(world
        .ledger
        .0
        .lock()
        .unwrap()
        .iter()
        .any(|entry| entry.action == "partnership.activated"));
}

#[test]
fn lapsed_negotiations_refuse_work_and_are_swept() {
    let world = world();
    let created = world
        .service
        .create_partnership(CreatePartnership {
            property_id: PropertyId("mls-5521".to_string()),
            initiator: BrokerId::from("summit-homes"),
            split: split(&[("harbor-realty", 60.0), ("summit-homes", 40.0)]),
            message: None,
            expires_in_days: None,
        })
        .unwrap();
    world.clock.advance(Duration::days(7) + Duration::minutes(1));

    let err = world
        .service
        .sign(
            &created.partnership_id,
            &BrokerId::from("harbor-realty"),
            &Credential::new(password_for("harbor-realty")),
            SigningOrigin::default(),
        )
        .unwrap_err();
    assert!(matches!(err, PartnershipServiceError::PartnershipExpired { .. }));

    let report = world.service.sweeper().sweep().expect("sweep runs");
    assert_eq!(report.expired, vec![created.partnership_id]);
    assert_eq!(
        world
            .service
            .get(&created.partnership_id)
            .unwrap()
            .partnership
            .status,
        PartnershipStatus::Expired
    );
}

#[test]
fn wrong_password_is_refused_without_side_effects() {
    let world = world();
    let created = world
        .service
        .create_partnership(CreatePartnership {
            property_id: PropertyId("mls-5521".to_string()),
            initiator: BrokerId::from("summit-homes"),
            split: split(&[("harbor-realty", 60.0), ("summit-homes", 40.0)]),
            message: None,
            expires_in_days: None,
        })
        .unwrap();
    let before = world.service.get(&created.partnership_id).unwrap();
    let audited = world.ledger.0.lock().unwrap().len();

    let err = world
        .service
        .sign(
            &created.partnership_id,
            &BrokerId::from("summit-homes"),
            &Credential::new("summit-homes"),
            SigningOrigin::default(),
        )
        .unwrap_err();
    assert!(matches!(err, PartnershipServiceError::InvalidCredential));
    assert_eq!(world.service.get(&created.partnership_id).unwrap(), before);
    assert_eq!(world.ledger.0.lock().unwrap().len(), audited);
}
