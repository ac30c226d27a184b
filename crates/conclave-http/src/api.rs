//! axum handlers for both server roles.

use std::ops::Deref;
use std::sync::Arc;

use aide::{OperationIo, axum::IntoApiResponse, openapi::OpenApi, transform::TransformOperation};
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use schemars::JsonSchema;
use serde::Serialize;
use tracing::error;

use conclave_core::coordinator::{Coordinator, SubmitError};
use conclave_core::msg::{ConnectAck, ConnectRequest, Event, EventResponse, PeerShare};
use conclave_core::participant::{EventError, Participant, ShareError};
use conclave_core::roster::RosterError;

use crate::http_client::{HttpAnnounceClient, HttpParticipantClient};

/// Shared coordinator handle for the request handlers.
#[derive(Clone)]
pub(crate) struct CoordinatorState(pub(crate) Arc<Coordinator<HttpAnnounceClient>>);

impl Deref for CoordinatorState {
    type Target = Coordinator<HttpAnnounceClient>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Shared participant handle for the request handlers.
#[derive(Clone)]
pub(crate) struct ParticipantState(pub(crate) Arc<Participant<HttpParticipantClient>>);

pub async fn serve_open_api(Extension(api): Extension<OpenApi>) -> impl IntoApiResponse {
    Json(api)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

pub(crate) fn health_docs(t: TransformOperation) -> TransformOperation {
    t.id("health")
        .description("Liveness probe, always answers ok.")
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct Received {
    received: bool,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct Ack {
    status: &'static str,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct Pong {
    status: &'static str,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct Peers {
    peers: Vec<String>,
}

pub(crate) fn connect_docs(t: TransformOperation) -> TransformOperation {
    t.id("connect").description(
        "Register a participant into the roster and return the \
         coordinator's public key.",
    )
}

pub(crate) async fn connect(
    State(state): State<CoordinatorState>,
    Json(request): Json<ConnectRequest>,
) -> Json<ConnectAck> {
    Json(state.on_connect(request).await)
}

pub(crate) fn submit_docs(t: TransformOperation) -> TransformOperation {
    t.id("submit")
        .description("Accept one partial result for an active event.")
}

pub(crate) async fn submit(
    State(state): State<CoordinatorState>,
    Json(response): Json<EventResponse>,
) -> Result<Json<Received>, ApiError> {
    state
        .on_partial(response)
        .await
        .map_err(ApiError::Submit)?;
    Ok(Json(Received { received: true }))
}

pub(crate) async fn ping(
    State(state): State<CoordinatorState>,
    Json(response): Json<EventResponse>,
) -> Result<Json<Pong>, ApiError> {
    state
        .on_ping(&response.participant_id)
        .await
        .map_err(ApiError::Ping)?;
    Ok(Json(Pong { status: "pong" }))
}

pub(crate) async fn peers(State(state): State<CoordinatorState>) -> Json<Peers> {
    Json(Peers {
        peers: state.peer_endpoints().await,
    })
}

pub(crate) fn event_docs(t: TransformOperation) -> TransformOperation {
    t.id("event")
        .description("Accept a signed event announcement from the coordinator.")
}

pub(crate) async fn event(
    State(state): State<ParticipantState>,
    Json(event): Json<Event>,
) -> Result<Json<Ack>, ApiError> {
    // Accepted and dedup'd announcements both answer 200.
    state
        .0
        .clone()
        .on_event(event, true)
        .await
        .map_err(ApiError::Event)?;
    Ok(Json(Ack { status: "received" }))
}

pub(crate) fn peer_data_docs(t: TransformOperation) -> TransformOperation {
    t.id("peerData")
        .description("Accept one signed share from a peer participant.")
}

pub(crate) async fn peer_data(
    State(state): State<ParticipantState>,
    Json(share): Json<PeerShare>,
) -> Result<Json<Ack>, ApiError> {
    // Stored, dropped and dedup'd shares all answer 200; only shares that
    // fail authentication are an error.
    state
        .0
        .clone()
        .on_peer_share(share)
        .await
        .map_err(ApiError::Share)?;
    Ok(Json(Ack { status: "received" }))
}

#[derive(OperationIo, Serialize)]
#[serde(tag = "type", content = "details")]
#[aide(output)]
pub(crate) enum ApiError {
    #[serde(serialize_with = "crate::serialize_error_chain")]
    Submit(SubmitError),
    #[serde(serialize_with = "crate::serialize_error_chain")]
    Ping(RosterError),
    #[serde(serialize_with = "crate::serialize_error_chain")]
    Event(EventError),
    #[serde(serialize_with = "crate::serialize_error_chain")]
    Share(ShareError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = match serde_json::to_string_pretty(&self) {
            Ok(body) => body,
            Err(err) => {
                error!(%err, "unable to serialize error, returning status code 500");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "error serialization failed",
                )
                    .into_response();
            }
        };
        let status_code = match self {
            ApiError::Submit(_) | ApiError::Event(_) | ApiError::Share(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Ping(_) => StatusCode::NOT_FOUND,
        };
        error!(err = body, %status_code);
        (status_code, body).into_response()
    }
}
