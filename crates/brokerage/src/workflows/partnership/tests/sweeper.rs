use chrono::Duration;

use super::common::*;
use crate::workflows::partnership::collaborators::NotificationKind;
use crate::workflows::partnership::domain::PartnershipStatus;
use crate::workflows::partnership::signing::SigningOrigin;
use crate::workflows::partnership::store::AgreementStore;
use crate::workflows::partnership::sweeper::expire_if_due;

#[test]
fn sweep_expires_only_lapsed_pending_partnerships() {
    let h = harness();
    let lapsing = h.create(&[("owner", 60.0), ("alpha", 40.0)], "alpha");

    let active = h.create(&[("owner", 50.0), ("bravo", 50.0)], "bravo");
    for who in ["owner", "bravo"] {
        h.service
            .sign(
                &active.partnership_id,
                &broker(who),
                &credential(),
                SigningOrigin::default(),
            )
            .expect("signs");
    }

    let sweeper = h.service.sweeper();
    assert!(sweeper.sweep().expect("sweep").expired.is_empty());

    h.clock.advance(Duration::days(8));
    let report = sweeper.sweep().expect("sweep");
    assert_eq!(report.expired, vec![lapsing.partnership_id]);

    let expired = h.store.fetch(&lapsing.partnership_id).unwrap().unwrap();
    assert_eq!(expired.partnership.status, PartnershipStatus::Expired);
    let untouched = h.store.fetch(&active.partnership_id).unwrap().unwrap();
    assert_eq!(untouched.partnership.status, PartnershipStatus::Active);

    let notice = h
        .notifier
        .events()
        .into_iter()
        .find(|event| event.kind == NotificationKind::PartnershipExpired)
        .expect("expiry notice");
    assert_eq!(notice.recipients, vec![broker("alpha"), broker("owner")]);
    assert!(h.audit.actions().contains(&"partnership.expired".to_string()));
}

#[test]
fn second_sweep_is_a_no_op() {
    let h = harness();
    h.create(&[("owner", 60.0), ("alpha", 40.0)], "alpha");
    h.clock.advance(Duration::days(30));

    let sweeper = h.service.sweeper().with_batch_size(1);
    assert_eq!(sweeper.sweep().unwrap().expired.len(), 1);
    let again = sweeper.sweep().unwrap();
    assert_eq!(again.examined, 0);
    assert!(again.expired.is_empty());
}

#[test]
fn small_batches_still_reach_every_lapsed_row() {
    let h = harness();
    for _ in 0..3 {
        h.create(&[("owner", 60.0), ("alpha", 40.0)], "alpha");
    }
    h.clock.advance(Duration::days(8));

    let sweeper = h.service.sweeper().with_batch_size(2);
    assert_eq!(sweeper.sweep().unwrap().expired.len(), 2);
    assert_eq!(sweeper.sweep().unwrap().expired.len(), 1);
    assert!(sweeper.sweep().unwrap().expired.is_empty());
}

#[test]
fn exact_deadline_is_not_yet_expired() {
    let mut record = record_with(&[("owner", 60.0), ("alpha", 40.0)], "alpha");
    let deadline = record.partnership.expires_at;

    assert!(!expire_if_due(&mut record, deadline));
    assert_eq!(record.partnership.status, PartnershipStatus::Pending);
    assert!(expire_if_due(&mut record, deadline + Duration::seconds(1)));
    assert_eq!(record.partnership.status, PartnershipStatus::Expired);
}
