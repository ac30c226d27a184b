//! Routers for the two server roles.

use aide::{
    axum::{
        ApiRouter,
        routing::{get, get_with, post_with},
    },
    swagger::Swagger,
};
use axum::extract::DefaultBodyLimit;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, classify::StatusInRangeAsFailures, trace::TraceLayer,
};

use crate::api::{self, CoordinatorState, ParticipantState};

pub(crate) fn coordinator_router(state: CoordinatorState) -> ApiRouter {
    // 400..=599 responses are logged as failures.
    let classifier = StatusInRangeAsFailures::new(400..=599).into_make_classifier();
    let log_layer = TraceLayer::new(classifier);
    ApiRouter::new()
        // participant registration:
        .api_route("/connect", post_with(api::connect, api::connect_docs))
        // partial results from participants:
        .api_route("/submit", post_with(api::submit, api::submit_docs))
        // participant liveness:
        .route("/ping", axum::routing::post(api::ping))
        // debug listing of the roster:
        .route("/peers", axum::routing::get(api::peers))
        .api_route("/health", get_with(api::health, api::health_docs))
        .route("/swagger", Swagger::new("/api.json").axum_route())
        .route("/api.json", get(api::serve_open_api))
        .with_state(state)
        // panics become 500s instead of bringing the server down
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::disable())
        .layer(ServiceBuilder::new().layer(log_layer))
}

pub(crate) fn participant_router(state: ParticipantState) -> ApiRouter {
    let classifier = StatusInRangeAsFailures::new(400..=599).into_make_classifier();
    let log_layer = TraceLayer::new(classifier);
    ApiRouter::new()
        // signed event announcements from the coordinator:
        .api_route("/event", post_with(api::event, api::event_docs))
        // signed shares from peer participants:
        .api_route("/peer-data", post_with(api::peer_data, api::peer_data_docs))
        .api_route("/health", get_with(api::health, api::health_docs))
        .route("/swagger", Swagger::new("/api.json").axum_route())
        .route("/api.json", get(api::serve_open_api))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::disable())
        .layer(ServiceBuilder::new().layer(log_layer))
}
