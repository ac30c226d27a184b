//! The coordinator's view of currently-known participants.
//!
//! Reads dominate (selection, authorization, membership checks), so the map
//! sits behind a multi-reader lock and iteration happens over snapshots
//! instead of holding the lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::msg::{ConnectRequest, Endpoint, ParticipantId};

/// One known participant and the last evidence of its liveness.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub participant_id: ParticipantId,
    pub endpoint: Endpoint,
    pub public_key: String,
    pub last_ping: Instant,
}

impl RosterEntry {
    /// Whether the entry showed liveness within `timeout` of `now`.
    pub fn is_alive(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_ping) < timeout
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("participant {0} is not in the roster")]
    NotFound(ParticipantId),
}

/// Concurrent map of participant id to [`RosterEntry`].
#[derive(Default)]
pub struct Roster {
    entries: RwLock<HashMap<ParticipantId, RosterEntry>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or overwrite) the entry for a connecting participant,
    /// counting the connection itself as liveness evidence.
    pub async fn insert(&self, request: &ConnectRequest) {
        let entry = RosterEntry {
            participant_id: request.participant_id.clone(),
            endpoint: request.endpoint.clone(),
            public_key: request.public_key.clone(),
            last_ping: Instant::now(),
        };
        self.entries
            .write()
            .await
            .insert(request.participant_id.clone(), entry);
    }

    /// Advance `last_ping` for a known participant.
    pub async fn touch(&self, participant_id: &str) -> Result<(), RosterError> {
        match self.entries.write().await.get_mut(participant_id) {
            Some(entry) => {
                entry.last_ping = Instant::now();
                Ok(())
            }
            None => Err(RosterError::NotFound(participant_id.to_string())),
        }
    }

    pub async fn contains(&self, participant_id: &str) -> bool {
        self.entries.read().await.contains_key(participant_id)
    }

    /// Copy of all entries, for iteration without holding the lock.
    pub async fn snapshot(&self) -> Vec<RosterEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Remove an entry. The caller must have verified that no active event
    /// references the id.
    pub async fn remove(&self, participant_id: &str) -> Option<RosterEntry> {
        self.entries.write().await.remove(participant_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
