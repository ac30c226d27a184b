//! The HTTP servers for both roles.
//!
//! Each server splits binding from serving so callers (and tests) can learn
//! the bound address before traffic flows. Shutdown is a watch flag: flip it
//! through the handle returned by [`CoordinatorServer::stop_handle`] /
//! [`ParticipantServer::stop_handle`] and both the axum server and the
//! background loops wind down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aide::openapi::{Info, OpenApi};
use anyhow::Context;
use axum::{Extension, Router, routing::IntoMakeService};
use conclave_core::computation::{ComputationRegistry, DataSource};
use conclave_core::coordinator::Coordinator;
use conclave_core::crypto::Signer;
use conclave_core::msg::Endpoint;
use conclave_core::participant::Participant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::api::{CoordinatorState, ParticipantState};
use crate::config::{ConfigError, CoordinatorConfig, ParticipantConfig};
use crate::http_client::{HttpAnnounceClient, HttpParticipantClient};
use crate::pool::ClientPool;
use crate::router;

/// Per-attempt connect timeout of the coordinator's fan-out pool.
const ANNOUNCE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Per-attempt read timeout of the coordinator's fan-out pool.
const ANNOUNCE_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period for background loops after the axum server has stopped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The complete coordinator service, ready for `axum::serve`.
pub fn coordinator_service(
    coordinator: Arc<Coordinator<HttpAnnounceClient>>,
) -> IntoMakeService<Router> {
    let mut api = OpenApi {
        info: Info {
            title: "Conclave Coordinator".to_string(),
            description: Some(
                "Announces MPC events to registered participants and aggregates \
                 their partial results."
                    .to_string(),
            ),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Info::default()
        },
        ..OpenApi::default()
    };
    router::coordinator_router(CoordinatorState(coordinator))
        .finish_api(&mut api)
        .layer(Extension(api))
        .into_make_service()
}

/// The complete participant service, ready for `axum::serve`.
pub fn participant_service(
    participant: Arc<Participant<HttpParticipantClient>>,
) -> IntoMakeService<Router> {
    let mut api = OpenApi {
        info: Info {
            title: "Conclave Participant".to_string(),
            description: Some(
                "Receives signed MPC events and exchanges additive shares with \
                 peer participants."
                    .to_string(),
            ),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Info::default()
        },
        ..OpenApi::default()
    };
    router::participant_router(ParticipantState(participant))
        .finish_api(&mut api)
        .layer(Extension(api))
        .into_make_service()
}

fn signer_from(private_key: Option<&String>) -> anyhow::Result<Signer> {
    match private_key {
        Some(hex) => Ok(Signer::from_hex(hex)?),
        None => Ok(Signer::generate()),
    }
}

/// An HTTP-bound coordinator.
pub struct CoordinatorServer {
    coordinator: Arc<Coordinator<HttpAnnounceClient>>,
    listener: TcpListener,
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
}

impl CoordinatorServer {
    /// Validate the config, build the coordinator and bind its listener.
    pub async fn bind(
        config: &CoordinatorConfig,
        computations: ComputationRegistry,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        if config.tls.is_some() {
            return Err(ConfigError::TlsUnsupported.into());
        }
        let signer = signer_from(config.private_key.as_ref())?;
        info!(public_key = %signer.public_key_hex(), "coordinator identity ready");
        let pool = Arc::new(ClientPool::new(
            ANNOUNCE_CONNECT_TIMEOUT,
            ANNOUNCE_READ_TIMEOUT,
        ));
        let coordinator = Arc::new(Coordinator::new(
            config.settings(),
            signer,
            computations,
            HttpAnnounceClient::new(pool),
        ));
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .context("unable to bind coordinator socket")?;
        let local_addr = listener.local_addr().context("listener has no address")?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            coordinator,
            listener,
            local_addr,
            stop,
        })
    }

    /// Handle for creating and announcing events.
    pub fn coordinator(&self) -> Arc<Coordinator<HttpAnnounceClient>> {
        self.coordinator.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `true` through this handle to shut the server down.
    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.stop.clone()
    }

    /// Serve requests and run the background loops until stopped.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!("serving coordinator on {}", self.local_addr);
        let stop = self.stop.clone();
        let loops = {
            let coordinator = self.coordinator.clone();
            let stop = stop.subscribe();
            tokio::spawn(async move { coordinator.run(stop).await })
        };
        let mut shutdown = stop.subscribe();
        axum::serve(self.listener, coordinator_service(self.coordinator))
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            })
            .await
            .context("coordinator server error")?;
        stop.send_replace(true);
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, loops).await;
        Ok(())
    }
}

/// An HTTP-bound participant.
pub struct ParticipantServer {
    participant: Arc<Participant<HttpParticipantClient>>,
    listener: TcpListener,
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
}

impl ParticipantServer {
    /// Validate the config, build the participant and bind its listener.
    ///
    /// When `listen_port` is 0 the advertised endpoint carries the actually
    /// bound port.
    pub async fn bind(
        config: &ParticipantConfig,
        data_source: Box<dyn DataSource>,
        computations: ComputationRegistry,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let signer = signer_from(config.private_key.as_ref())?;
        let participant_id = config
            .participant_id
            .clone()
            .unwrap_or_else(|| format!("participant-{}", Uuid::new_v4()));
        info!(
            participant = %participant_id,
            public_key = %signer.public_key_hex(),
            "participant identity ready"
        );
        let pool = Arc::new(ClientPool::new(
            Duration::from_secs(config.connect_timeout),
            Duration::from_secs(config.read_timeout),
        ));
        let client = HttpParticipantClient::new(pool, config.coordinator_endpoint());
        let listener = TcpListener::bind((config.listen_host.as_str(), config.listen_port))
            .await
            .context("unable to bind participant socket")?;
        let local_addr = listener.local_addr().context("listener has no address")?;
        let endpoint = Endpoint::new(config.listen_host.clone(), local_addr.port());
        let participant = Arc::new(Participant::new(
            participant_id,
            endpoint,
            config.settings(),
            signer,
            data_source,
            computations,
            client,
        ));
        let (stop, _) = watch::channel(false);
        Ok(Self {
            participant,
            listener,
            local_addr,
            stop,
        })
    }

    /// Re-expose an existing participant after its listener was torn down.
    pub async fn resume(
        participant: Arc<Participant<HttpParticipantClient>>,
        addr: SocketAddr,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("unable to bind participant socket")?;
        let local_addr = listener.local_addr().context("listener has no address")?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            participant,
            listener,
            local_addr,
            stop,
        })
    }

    /// Handle for registering with the coordinator and inspecting state.
    pub fn participant(&self) -> Arc<Participant<HttpParticipantClient>> {
        self.participant.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `true` through this handle to shut the server down.
    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.stop.clone()
    }

    /// Serve requests and run the ping loop until stopped.
    ///
    /// Registration with the coordinator is the caller's move (see
    /// [`Participant::connect`]); serving does not require it, and a
    /// participant that registers later still accepts propagated events once
    /// it knows the coordinator key.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!("serving participant on {}", self.local_addr);
        let stop = self.stop.clone();
        let loops = {
            let participant = self.participant.clone();
            let stop = stop.subscribe();
            tokio::spawn(async move { participant.run(stop).await })
        };
        let mut shutdown = stop.subscribe();
        axum::serve(self.listener, participant_service(self.participant))
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            })
            .await
            .context("participant server error")?;
        stop.send_replace(true);
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, loops).await;
        Ok(())
    }
}
