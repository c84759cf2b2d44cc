use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::domain::{BrokerId, PartnershipId, PropertyId, ProposalId};
use super::negotiation::{ProposalAction, ProposalResponse};
use super::participants::ParticipantAddition;
use super::service::{CreatePartnership, ErrorClass, PartnershipService, PartnershipServiceError};
use super::signing::{Credential, CredentialVerifier, SigningOrigin};
use super::split::CommissionSplit;
use super::store::AgreementStore;

type SharedService<S, V> = Arc<PartnershipService<S, V>>;

#[derive(Debug, Deserialize)]
pub struct CreatePartnershipRequest {
    pub property_id: PropertyId,
    pub initiator_broker_id: BrokerId,
    pub proposed_split: BTreeMap<BrokerId, f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AddParticipantRequest {
    pub actor_broker_id: BrokerId,
    pub new_broker_id: BrokerId,
    pub new_split: BTreeMap<BrokerId, f64>,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub responder_broker_id: BrokerId,
    pub action: ProposalAction,
    #[serde(default)]
    pub counter_split: Option<BTreeMap<BrokerId, f64>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub broker_id: BrokerId,
    pub credential: Credential,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor_broker_id: BrokerId,
}

/// Router builder exposing the partnership negotiation endpoints.
pub fn partnership_router<S, V>(service: SharedService<S, V>) -> Router
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    Router::new()
        .route("/api/v1/partnerships", post(create_handler::<S, V>))
        .route(
            "/api/v1/partnerships/:partnership_id",
            get(view_handler::<S, V>),
        )
        .route(
            "/api/v1/partnerships/:partnership_id/participants",
            post(add_participant_handler::<S, V>),
        )
        .route(
            "/api/v1/partnerships/:partnership_id/sign",
            post(sign_handler::<S, V>),
        )
        .route(
            "/api/v1/partnerships/:partnership_id/cancel",
            post(cancel_handler::<S, V>),
        )
        .route(
            "/api/v1/proposals/:proposal_id/respond",
            post(respond_handler::<S, V>),
        )
        .with_state(service)
}

pub(crate) async fn create_handler<S, V>(
    State(service): State<SharedService<S, V>>,
    axum::Json(request): axum::Json<CreatePartnershipRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    let split = match CommissionSplit::new(request.proposed_split) {
        Ok(split) => split,
        Err(err) => return error_response(&service, PartnershipServiceError::from(err)),
    };

    let result = service.create_partnership(CreatePartnership {
        property_id: request.property_id,
        initiator: request.initiator_broker_id,
        split,
        message: request.message,
        expires_in_days: request.expires_in_days,
    });

    match result {
        Ok(created) => (StatusCode::CREATED, axum::Json(created)).into_response(),
        Err(err) => error_response(&service, err),
    }
}

pub(crate) async fn view_handler<S, V>(
    State(service): State<SharedService<S, V>>,
    Path(partnership_id): Path<Uuid>,
) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    match service.get(&PartnershipId(partnership_id)) {
        Ok(record) => (StatusCode::OK, axum::Json(record.view())).into_response(),
        Err(err) => error_response(&service, err),
    }
}

pub(crate) async fn add_participant_handler<S, V>(
    State(service): State<SharedService<S, V>>,
    Path(partnership_id): Path<Uuid>,
    axum::Json(request): axum::Json<AddParticipantRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    let new_split = match CommissionSplit::new(request.new_split) {
        Ok(split) => split,
        Err(err) => return error_response(&service, PartnershipServiceError::from(err)),
    };

    let addition = ParticipantAddition {
        actor: request.actor_broker_id,
        new_broker: request.new_broker_id,
        new_split,
    };
    match service.add_participant(&PartnershipId(partnership_id), addition) {
        Ok(outcome) => {
            let payload = json!({
                "ok": true,
                "role": outcome.role,
                "signatures_invalidated": outcome.signatures_invalidated,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(&service, err),
    }
}

pub(crate) async fn respond_handler<S, V>(
    State(service): State<SharedService<S, V>>,
    Path(proposal_id): Path<Uuid>,
    axum::Json(request): axum::Json<RespondRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    let counter_split = match request.counter_split.map(CommissionSplit::new).transpose() {
        Ok(split) => split,
        Err(err) => return error_response(&service, PartnershipServiceError::from(err)),
    };

    let response = ProposalResponse {
        responder: request.responder_broker_id,
        action: request.action,
        counter_split,
        message: request.message,
    };
    match service.respond(&ProposalId(proposal_id), response) {
        Ok(outcome) => {
            let mut payload = json!({ "ok": true });
            if let (Some(map), Ok(serde_json::Value::Object(extra))) =
                (payload.as_object_mut(), serde_json::to_value(&outcome))
            {
                map.extend(extra);
            }
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(&service, err),
    }
}

pub(crate) async fn sign_handler<S, V>(
    State(service): State<SharedService<S, V>>,
    Path(partnership_id): Path<Uuid>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<SignRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    let origin = origin_from_headers(&headers);
    match service.sign(
        &PartnershipId(partnership_id),
        &request.broker_id,
        &request.credential,
        origin,
    ) {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(&service, err),
    }
}

pub(crate) async fn cancel_handler<S, V>(
    State(service): State<SharedService<S, V>>,
    Path(partnership_id): Path<Uuid>,
    axum::Json(request): axum::Json<CancelRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    match service.cancel(&PartnershipId(partnership_id), &request.actor_broker_id) {
        Ok(()) => (StatusCode::OK, axum::Json(json!({ "ok": true }))).into_response(),
        Err(err) => error_response(&service, err),
    }
}

/// First `x-forwarded-for` hop and the user agent, when present.
pub(crate) fn origin_from_headers(headers: &HeaderMap) -> SigningOrigin {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
    let client = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    SigningOrigin { ip_address, client }
}

pub(crate) fn status_for(error: &PartnershipServiceError) -> StatusCode {
    match error.class() {
        ErrorClass::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Authorization => match error {
            PartnershipServiceError::InvalidCredential => StatusCode::UNAUTHORIZED,
            _ => StatusCode::FORBIDDEN,
        },
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Infrastructure if error.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Conflicts carry the authoritative partnership state so the caller can resync.
fn error_response<S, V>(service: &SharedService<S, V>, error: PartnershipServiceError) -> Response
where
    S: AgreementStore + 'static,
    V: CredentialVerifier + 'static,
{
    let status = status_for(&error);
    let mut payload = json!({
        "error": error.to_string(),
        "class": error.class(),
        "retryable": error.is_transient(),
    });

    if error.class() == ErrorClass::Conflict {
        if let Some(current) = error
            .partnership_id()
            .and_then(|id| service.get(&id).ok())
        {
            if let (Some(map), Ok(view)) =
                (payload.as_object_mut(), serde_json::to_value(current.view()))
            {
                map.insert("current".to_string(), view);
            }
        }
    }

    (status, axum::Json(payload)).into_response()
}
