use crate::infra::{build_service, ApiService, ShiftableClock, DEMO_BROKERS};
use brokerage::config::{AppConfig, MAX_EXPIRY_CEILING_DAYS};
use brokerage::error::AppError;
use brokerage::workflows::partnership::{
    BrokerId, CommissionSplit, CreatePartnership, Credential, ParticipantAddition,
    PartnershipId, PartnershipRecord, PropertyId, ProposalAction, ProposalResponse,
    RespondOutcome, SigningOrigin, SystemClock,
};
use chrono::Duration;
use clap::Args;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Stop after the counter-proposal instead of signing through to activation.
    #[arg(long)]
    pub(crate) skip_signing: bool,
    /// Negotiation window in days for the demo partnership.
    #[arg(long)]
    pub(crate) expires_in_days: Option<u32>,
}

#[derive(Args, Debug)]
pub(crate) struct SweepArgs {
    /// How far past now the sweep should run, in days.
    #[arg(
        long,
        default_value_t = 8,
        value_parser = clap::value_parser!(i64).range(0..=i64::from(MAX_EXPIRY_CEILING_DAYS))
    )]
    pub(crate) days_ahead: i64,
    /// Number of pending negotiations to seed before sweeping.
    #[arg(long, default_value_t = 3)]
    pub(crate) seed: usize,
}

fn split(entries: &[(&str, f64)]) -> Result<CommissionSplit, AppError> {
    let split = CommissionSplit::new(
        entries
            .iter()
            .map(|(broker, percent)| (BrokerId::from(*broker), *percent)),
    )
    .map_err(brokerage::workflows::partnership::PartnershipServiceError::from)?;
    Ok(split)
}

fn password(broker: &str) -> Credential {
    let secret = DEMO_BROKERS
        .iter()
        .find(|(id, _)| *id == broker)
        .map(|(_, secret)| *secret)
        .unwrap_or_default();
    Credential::new(secret)
}

fn sign(service: &ApiService, id: &PartnershipId, broker: &str) -> Result<(), AppError> {
    let origin = SigningOrigin {
        ip_address: Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 24))),
        client: Some("brokerage-demo".to_string()),
    };
    let outcome = service.sign(id, &BrokerId::from(broker), &password(broker), origin)?;
    println!(
        "  {broker} signed (all signed: {})",
        if outcome.all_signed { "yes" } else { "no" }
    );
    Ok(())
}

fn render(record: &PartnershipRecord) {
    let partnership = &record.partnership;
    println!(
        "  status {} | expires {} | version {}",
        partnership.status,
        partnership.expires_at.format("%Y-%m-%d %H:%M UTC"),
        partnership.version
    );
    for participant in &record.participants {
        println!(
            "    {:<20} {:<10} {:>6.2}%  {}",
            participant.broker_id,
            participant.role,
            participant.commission_percent,
            if participant.signed { "signed" } else { "unsigned" }
        );
    }
    for proposal in &record.proposals {
        println!(
            "    proposal {} by {} is {}",
            proposal.id, proposal.proposed_by, proposal.status
        );
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let service = build_service(config.partnership, Arc::new(SystemClock));

    println!("Co-listing partnership demo");
    let created = service.create_partnership(CreatePartnership {
        property_id: PropertyId("mls-1001".to_string()),
        initiator: BrokerId::from("summit-homes"),
        split: split(&[("harbor-realty", 60.0), ("summit-homes", 40.0)])?,
        message: Some("Our buyer list overlaps your waterfront inventory".to_string()),
        expires_in_days: args.expires_in_days,
    })?;
    let id = created.partnership_id;
    println!("\n1. summit-homes proposes 60/40 on mls-1001");
    render(&service.get(&id)?);

    println!("\n2. harbor-realty signs the opening terms");
    sign(&service, &id, "harbor-realty")?;

    println!("\n3. summit-homes brings in lakeside-group");
    let added = service.add_participant(
        &id,
        ParticipantAddition {
            actor: BrokerId::from("summit-homes"),
            new_broker: BrokerId::from("lakeside-group"),
            new_split: split(&[
                ("harbor-realty", 50.0),
                ("summit-homes", 30.0),
                ("lakeside-group", 20.0),
            ])?,
        },
    )?;
    println!(
        "  lakeside-group seated as {}; {} signature(s) invalidated",
        added.role, added.signatures_invalidated
    );
    let record = service.get(&id)?;
    render(&record);

    println!("\n4. harbor-realty counters at 55/27.5/17.5");
    let pending = match record.pending_proposal() {
        Some(proposal) => proposal.id,
        None => return Ok(()),
    };
    let countered = service.respond(
        &pending,
        ProposalResponse {
            responder: BrokerId::from("harbor-realty"),
            action: ProposalAction::Counter,
            counter_split: Some(split(&[
                ("harbor-realty", 55.0),
                ("summit-homes", 27.5),
                ("lakeside-group", 17.5),
            ])?),
            message: Some("Listing side carries the marketing spend".to_string()),
        },
    )?;
    render(&service.get(&id)?);

    if args.skip_signing {
        return Ok(());
    }

    let RespondOutcome::Countered { proposal_id, .. } = countered else {
        return Ok(());
    };
    println!("\n5. lakeside-group accepts the counter");
    service.respond(
        &proposal_id,
        ProposalResponse {
            responder: BrokerId::from("lakeside-group"),
            action: ProposalAction::Accept,
            counter_split: None,
            message: None,
        },
    )?;

    println!("\n6. everyone signs");
    for broker in ["harbor-realty", "summit-homes", "lakeside-group"] {
        sign(&service, &id, broker)?;
    }
    render(&service.get(&id)?);

    Ok(())
}

pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let clock = Arc::new(ShiftableClock::new());
    let service = build_service(config.partnership, clock.clone());

    for _ in 0..args.seed {
        service.create_partnership(CreatePartnership {
            property_id: PropertyId("mls-1002".to_string()),
            initiator: BrokerId::from("ridgeline-partners"),
            split: split(&[("summit-homes", 70.0), ("ridgeline-partners", 30.0)])?,
            message: None,
            expires_in_days: None,
        })?;
    }

    clock.shift(Duration::days(args.days_ahead));
    let report = service
        .sweeper()
        .sweep()
        .map_err(brokerage::workflows::partnership::PartnershipServiceError::from)?;

    println!(
        "Sweep {} day(s) ahead: examined {}, expired {}",
        args.days_ahead,
        report.examined,
        report.expired.len()
    );
    for id in &report.expired {
        println!("  expired {id}");
    }
    Ok(())
}
