//! Per-endpoint HTTP clients with idle expiry.
//!
//! `reqwest` clients are cheap to clone but carry per-endpoint connection
//! caches; keying them by endpoint lets the liveness loop drop the cached
//! connections of an evicted participant without disturbing the rest.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use conclave_core::msg::Endpoint;
use tokio::sync::RwLock;
use tracing::debug;

/// Idle time after which a pooled client is rebuilt.
const IDLE_EXPIRY: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unable to build HTTP client")]
    Build(#[source] reqwest::Error),
}

struct PooledClient {
    client: reqwest::Client,
    last_used: Instant,
}

pub struct ClientPool {
    clients: RwLock<HashMap<String, PooledClient>>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl ClientPool {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            connect_timeout,
            read_timeout,
        }
    }

    /// A client for `endpoint`, fresh or reused.
    pub async fn get(&self, endpoint: &Endpoint) -> Result<reqwest::Client, PoolError> {
        let key = endpoint.to_string();
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        if let Some(pooled) = clients.get_mut(&key) {
            if now.duration_since(pooled.last_used) < IDLE_EXPIRY {
                pooled.last_used = now;
                return Ok(pooled.client.clone());
            }
        }
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()
            .map_err(PoolError::Build)?;
        clients.insert(
            key,
            PooledClient {
                client: client.clone(),
                last_used: now,
            },
        );
        Ok(client)
    }

    /// Drop the cached client for an endpoint.
    pub async fn remove(&self, endpoint: &Endpoint) {
        if self.clients.write().await.remove(&endpoint.to_string()).is_some() {
            debug!(%endpoint, "dropped pooled connection");
        }
    }

    /// Reap clients idle past the expiry.
    pub async fn cleanup_expired(&self) {
        let now = Instant::now();
        self.clients
            .write()
            .await
            .retain(|_, pooled| now.duration_since(pooled.last_used) < IDLE_EXPIRY);
    }
}
