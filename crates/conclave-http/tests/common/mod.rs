// The module is built separately for each integration test, so helpers used
// by only one test would otherwise warn.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use conclave_core::computation::ComputationRegistry;
use conclave_core::coordinator::Coordinator;
use conclave_core::participant::Participant;
use conclave_core::sum::{AdditiveSource, AdditiveSum};
use conclave_http::{
    CoordinatorConfig, CoordinatorServer, HttpAnnounceClient, HttpParticipantClient,
    ParticipantConfig, ParticipantServer,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn sum_registry() -> ComputationRegistry {
    ComputationRegistry::new().register("sum", Arc::new(AdditiveSum))
}

/// A coordinator config bound to an ephemeral port with tight liveness
/// windows so tests do not wait on production cadences.
pub(crate) fn coordinator_config(min_participants: usize, event_timeout: u64) -> CoordinatorConfig {
    CoordinatorConfig {
        host: "127.0.0.1".into(),
        port: 0,
        min_participants,
        max_participants: 10,
        event_timeout,
        ping_interval: 1,
        client_timeout: 2,
        ..CoordinatorConfig::default()
    }
}

pub(crate) struct TestCoordinator {
    pub addr: SocketAddr,
    pub coordinator: Arc<Coordinator<HttpAnnounceClient>>,
    pub stop: watch::Sender<bool>,
}

pub(crate) async fn start_coordinator(config: &CoordinatorConfig) -> TestCoordinator {
    let server = CoordinatorServer::bind(config, sum_registry())
        .await
        .expect("bind coordinator");
    let addr = server.local_addr();
    let coordinator = server.coordinator();
    let stop = server.stop_handle();
    tokio::spawn(async move { server.serve().await.expect("coordinator server crashed") });
    TestCoordinator {
        addr,
        coordinator,
        stop,
    }
}

pub(crate) fn participant_config(coordinator: SocketAddr, share_delay_ms: u64) -> ParticipantConfig {
    ParticipantConfig {
        coordinator_host: "127.0.0.1".into(),
        coordinator_port: coordinator.port(),
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        health_check_interval: 1,
        coordinator_timeout: 5,
        share_delay_ms,
        ..ParticipantConfig::default()
    }
}

pub(crate) struct TestParticipant {
    pub addr: SocketAddr,
    pub participant: Arc<Participant<HttpParticipantClient>>,
    pub stop: watch::Sender<bool>,
}

/// Start a participant server, register it and return the handles.
pub(crate) async fn start_participant(
    coordinator: SocketAddr,
    id: &str,
    value: f64,
) -> TestParticipant {
    start_participant_with(&participant_config(coordinator, 100), id, value).await
}

pub(crate) async fn start_participant_with(
    config: &ParticipantConfig,
    id: &str,
    value: f64,
) -> TestParticipant {
    let mut config = config.clone();
    config.participant_id = Some(id.into());
    let server = ParticipantServer::bind(&config, Box::new(AdditiveSource::new(value)), sum_registry())
        .await
        .expect("bind participant");
    let addr = server.local_addr();
    let participant = server.participant();
    let stop = server.stop_handle();
    tokio::spawn(async move { server.serve().await.expect("participant server crashed") });
    participant.connect().await.expect("connect to coordinator");
    TestParticipant {
        addr,
        participant,
        stop,
    }
}
