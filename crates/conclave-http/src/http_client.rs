//! HTTP implementations of the core transport traits.

use std::sync::Arc;

use conclave_core::client::{AnnounceClient, ParticipantClient};
use conclave_core::msg::{
    ConnectAck, ConnectRequest, Endpoint, Event, EventParticipant, EventResponse, PeerShare,
};
use serde::Serialize;
use tracing::Level;

use crate::pool::{ClientPool, PoolError};

#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid response body from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

async fn post_json<B: Serialize + ?Sized>(
    pool: &ClientPool,
    endpoint: &Endpoint,
    route: &str,
    body: &B,
) -> Result<reqwest::Response, HttpClientError> {
    let url = format!("http://{endpoint}/{route}");
    let client = pool.get(endpoint).await?;
    let response = client
        .post(url.as_str())
        .json(body)
        .send()
        .await
        .map_err(|source| HttpClientError::Request {
            url: url.clone(),
            source,
        })?;
    if !response.status().is_success() {
        return Err(HttpClientError::Status {
            url,
            status: response.status(),
        });
    }
    Ok(response)
}

/// Coordinator-side fan-out client.
pub struct HttpAnnounceClient {
    pool: Arc<ClientPool>,
}

impl HttpAnnounceClient {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

impl AnnounceClient for HttpAnnounceClient {
    type Error = HttpClientError;

    #[tracing::instrument(
        level = Level::DEBUG,
        skip_all,
        fields(event_id = %event.event_id, to = %to.participant_id)
    )]
    async fn announce(&self, to: &EventParticipant, event: &Event) -> Result<(), HttpClientError> {
        post_json(&self.pool, &to.endpoint, "event", event)
            .await
            .map(drop)
    }

    async fn evict(&self, to: &Endpoint) {
        self.pool.remove(to).await;
    }

    async fn expire_idle(&self) {
        self.pool.cleanup_expired().await;
    }
}

/// Participant-side client for the coordinator and for peers.
pub struct HttpParticipantClient {
    pool: Arc<ClientPool>,
    coordinator: Endpoint,
}

impl HttpParticipantClient {
    pub fn new(pool: Arc<ClientPool>, coordinator: Endpoint) -> Self {
        Self { pool, coordinator }
    }
}

impl ParticipantClient for HttpParticipantClient {
    type Error = HttpClientError;

    #[tracing::instrument(level = Level::DEBUG, skip_all)]
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectAck, HttpClientError> {
        let response = post_json(&self.pool, &self.coordinator, "connect", request).await?;
        let url = format!("http://{}/connect", self.coordinator);
        response
            .json()
            .await
            .map_err(|source| HttpClientError::Decode { url, source })
    }

    #[tracing::instrument(
        level = Level::TRACE,
        skip_all,
        fields(event_id = %share.event_id, to = %to.participant_id)
    )]
    async fn send_share(
        &self,
        to: &EventParticipant,
        share: &PeerShare,
    ) -> Result<(), HttpClientError> {
        post_json(&self.pool, &to.endpoint, "peer-data", share)
            .await
            .map(drop)
    }

    #[tracing::instrument(level = Level::DEBUG, skip_all, fields(event_id = %response.event_id))]
    async fn submit(&self, response: &EventResponse) -> Result<(), HttpClientError> {
        post_json(&self.pool, &self.coordinator, "submit", response)
            .await
            .map(drop)
    }

    #[tracing::instrument(level = Level::TRACE, skip_all)]
    async fn ping(&self, response: &EventResponse) -> Result<(), HttpClientError> {
        post_json(&self.pool, &self.coordinator, "ping", response)
            .await
            .map(drop)
    }
}
