//! The coordinator: roster, participant selection, event lifecycle and
//! aggregation.
//!
//! A [`Coordinator`] owns the authoritative state of a deployment: which
//! participants exist ([`Roster`]), which events are in flight, and which
//! computations are registered. It talks to the network exclusively through
//! an [`AnnounceClient`], so the same state machine runs under the HTTP
//! binding and under the in-memory clients used in tests.
//!
//! Locks nest in a fixed order: roster before active events. No lock is held
//! across network I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::sync::{RwLock, oneshot, watch};
use tracing::{debug, info, warn};

use crate::client::AnnounceClient;
use crate::computation::{ComputationError, ComputationRegistry};
use crate::crypto::Signer;
use crate::msg::{
    ConnectAck, ConnectRequest, Event, EventId, EventKind, EventParticipant, EventResponse,
    ParticipantId, unix_millis,
};
use crate::roster::{Roster, RosterEntry, RosterError};


/// How often stalled events are checked for completion or expiry.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables of a [`Coordinator`], validated by the configuration layer.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Fewest participants an event may be created with.
    pub min_participants: usize,
    /// Most participants selected into one event.
    pub max_participants: usize,
    /// How long an active event may wait for partials before eviction.
    pub event_timeout: Duration,
    /// Cadence of the liveness loop.
    pub ping_interval: Duration,
    /// How long a roster entry stays alive without a ping.
    pub client_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            min_participants: 3,
            max_participants: 10,
            event_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(10),
            client_timeout: Duration::from_secs(30),
        }
    }
}

/// The final outcome of one announced event, as delivered to its sink.
pub type EventOutcome = Result<String, EventOutcomeError>;

/// Why an announced event produced no result.
#[derive(Debug, thiserror::Error)]
pub enum EventOutcomeError {
    #[error("event timed out with {received}/{expected} partials")]
    Timeout { received: usize, expected: usize },
    #[error("no computation registered for type {0:?}")]
    UnknownComputation(String),
    #[error("aggregation failed")]
    Aggregate(#[from] ComputationError),
}

#[derive(Debug, thiserror::Error)]
pub enum CreateEventError {
    #[error("not enough participants for an event ({available} connected, {required} required)")]
    InsufficientParticipants { available: usize, required: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("participant {0} is not connected")]
    UnknownParticipant(ParticipantId),
}

/// One announced event awaiting its partials.
struct ActiveEvent {
    /// Snapshot of the announced event; also pins roster entries against
    /// liveness eviction while the event is in flight.
    event: Event,
    expected: usize,
    created: Instant,
    partials: HashMap<ParticipantId, String>,
    result_tx: Option<oneshot::Sender<EventOutcome>>,
}

/// The coordinator state machine.
pub struct Coordinator<C> {
    settings: CoordinatorSettings,
    signer: Signer,
    roster: Roster,
    active: RwLock<HashMap<EventId, ActiveEvent>>,
    computations: ComputationRegistry,
    /// Process-wide selection randomness; locked independently of all tables.
    rng: Mutex<StdRng>,
    client: C,
}

impl<C: AnnounceClient> Coordinator<C> {
    pub fn new(
        settings: CoordinatorSettings,
        signer: Signer,
        computations: ComputationRegistry,
        client: C,
    ) -> Self {
        Self {
            settings,
            signer,
            roster: Roster::new(),
            active: RwLock::new(HashMap::new()),
            computations,
            rng: Mutex::new(StdRng::from_os_rng()),
            client,
        }
    }

    /// The hex-encoded public key participants verify events against.
    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Register a connecting participant and hand it the coordinator key.
    pub async fn on_connect(&self, request: ConnectRequest) -> ConnectAck {
        info!(
            participant = %request.participant_id,
            endpoint = %request.endpoint,
            "participant connected"
        );
        self.roster.insert(&request).await;
        ConnectAck {
            accepted: true,
            coordinator_public_key: self.signer.public_key_hex(),
        }
    }

    /// Advance the liveness clock for a pinging participant.
    pub async fn on_ping(&self, participant_id: &str) -> Result<(), RosterError> {
        self.roster.touch(participant_id).await
    }

    /// `host:port` of every roster entry, for the debug peers listing.
    pub async fn peer_endpoints(&self) -> Vec<String> {
        self.roster
            .snapshot()
            .await
            .into_iter()
            .map(|entry| entry.endpoint.to_string())
            .collect()
    }

    /// Select participants and assemble a signed event.
    ///
    /// Selection shuffles a roster snapshot under the PRNG lock and takes up
    /// to `max_participants`; fewer connected participants than
    /// `min_participants` fails without side effects.
    pub async fn create_event(
        &self,
        event_id: impl Into<EventId>,
        computation_type: impl Into<String>,
        metadata: Value,
    ) -> Result<Event, CreateEventError> {
        let mut entries = self.roster.snapshot().await;
        if entries.len() < self.settings.min_participants {
            return Err(CreateEventError::InsufficientParticipants {
                available: entries.len(),
                required: self.settings.min_participants,
            });
        }
        {
            let mut rng = self.rng.lock().expect("selection rng lock poisoned");
            entries.shuffle(&mut *rng);
        }
        entries.truncate(self.settings.max_participants);
        let participants = entries
            .into_iter()
            .map(|entry| EventParticipant {
                participant_id: entry.participant_id,
                endpoint: entry.endpoint,
                public_key: entry.public_key,
            })
            .collect();
        let mut event = Event {
            kind: EventKind::DataSubmission,
            event_id: event_id.into(),
            computation_type: computation_type.into(),
            participants,
            metadata,
            created_at: unix_millis(),
            coordinator_signature: String::new(),
        };
        event.coordinator_signature = self.signer.sign(&event.signing_payload());
        debug!(
            event_id = %event.event_id,
            participants = event.participants.len(),
            "event created"
        );
        Ok(event)
    }

    /// Announce an event to its participants and return the result sink.
    ///
    /// The active-event slot is registered before any delivery I/O, so a
    /// partial arriving mid-fan-out always finds it. Delivery is one
    /// best-effort attempt per participant; failures are logged and left to
    /// peer propagation or the event timeout.
    pub async fn announce(&self, event: Event) -> oneshot::Receiver<EventOutcome> {
        let (result_tx, result_rx) = oneshot::channel();
        let slot = ActiveEvent {
            event: event.clone(),
            expected: event.participants.len(),
            created: Instant::now(),
            partials: HashMap::new(),
            result_tx: Some(result_tx),
        };
        self.active
            .write()
            .await
            .insert(event.event_id.clone(), slot);

        let deliveries = event.participants.iter().map(async |participant| {
            if let Err(err) = self.client.announce(participant, &event).await {
                warn!(
                    %err,
                    participant = %participant.participant_id,
                    endpoint = %participant.endpoint,
                    "event delivery failed, relying on peer propagation or timeout"
                );
            }
        });
        futures::future::join_all(deliveries).await;
        debug!(event_id = %event.event_id, "event announced");
        result_rx
    }

    /// Ingest one partial result from a participant.
    ///
    /// Rejects senders outside the roster; silently drops partials for
    /// unknown events, from participants outside the event, and duplicates.
    pub async fn on_partial(&self, response: EventResponse) -> Result<(), SubmitError> {
        if !self.roster.contains(&response.participant_id).await {
            return Err(SubmitError::UnknownParticipant(response.participant_id));
        }
        let completed = {
            let mut active = self.active.write().await;
            let Some(slot) = active.get_mut(&response.event_id) else {
                debug!(event_id = %response.event_id, "dropping partial for unknown event");
                return Ok(());
            };
            if slot.event.participant(&response.participant_id).is_none() {
                warn!(
                    event_id = %response.event_id,
                    participant = %response.participant_id,
                    "dropping partial from a participant outside the event"
                );
                return Ok(());
            }
            if slot.partials.contains_key(&response.participant_id) {
                debug!(
                    event_id = %response.event_id,
                    participant = %response.participant_id,
                    "ignoring duplicate partial"
                );
                return Ok(());
            }
            slot.partials
                .insert(response.participant_id.clone(), response.partial);
            debug!(
                event_id = %response.event_id,
                received = slot.partials.len(),
                expected = slot.expected,
                "partial stored"
            );
            if slot.partials.len() >= slot.expected {
                // Removing under the write lock makes aggregation
                // at-most-once even if the sweep races this submission.
                active.remove(&response.event_id)
            } else {
                None
            }
        };
        if let Some(slot) = completed {
            self.finalize(slot).await;
        }
        Ok(())
    }

    /// Finalize stragglers and evict events past their timeout.
    pub async fn sweep_events(&self) {
        let now = Instant::now();
        let (ready, expired) = {
            let mut active = self.active.write().await;
            let ready_ids: Vec<EventId> = active
                .iter()
                .filter(|(_, slot)| slot.partials.len() >= slot.expected)
                .map(|(id, _)| id.clone())
                .collect();
            let expired_ids: Vec<EventId> = active
                .iter()
                .filter(|(_, slot)| {
                    slot.partials.len() < slot.expected
                        && now.duration_since(slot.created) > self.settings.event_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            let ready: Vec<ActiveEvent> = ready_ids
                .iter()
                .filter_map(|id| active.remove(id))
                .collect();
            let expired: Vec<ActiveEvent> = expired_ids
                .iter()
                .filter_map(|id| active.remove(id))
                .collect();
            (ready, expired)
        };
        for slot in ready {
            self.finalize(slot).await;
        }
        for mut slot in expired {
            let received = slot.partials.len();
            warn!(
                event_id = %slot.event.event_id,
                received,
                expected = slot.expected,
                "evicting timed-out event"
            );
            if let Some(tx) = slot.result_tx.take() {
                let _ = tx.send(Err(EventOutcomeError::Timeout {
                    received,
                    expected: slot.expected,
                }));
            }
        }
    }

    /// Evict dead roster entries that no active event references.
    ///
    /// Returns the evicted entries so the caller can drop their cached
    /// connections.
    pub async fn liveness_pass(&self) -> Vec<RosterEntry> {
        let now = Instant::now();
        let dead: Vec<ParticipantId> = self
            .roster
            .snapshot()
            .await
            .into_iter()
            .filter(|entry| !entry.is_alive(now, self.settings.client_timeout))
            .map(|entry| entry.participant_id)
            .collect();
        if dead.is_empty() {
            return Vec::new();
        }
        let referenced: HashSet<ParticipantId> = {
            let active = self.active.read().await;
            active
                .values()
                .flat_map(|slot| {
                    slot.event
                        .participants
                        .iter()
                        .map(|p| p.participant_id.clone())
                })
                .collect()
        };
        let mut evicted = Vec::new();
        for participant_id in dead {
            if referenced.contains(&participant_id) {
                debug!(
                    participant = %participant_id,
                    "dead participant still referenced by an active event"
                );
                continue;
            }
            if let Some(entry) = self.roster.remove(&participant_id).await {
                info!(participant = %participant_id, "evicting dead participant");
                evicted.push(entry);
            }
        }
        evicted
    }

    /// Drive the sweep and liveness loops until the stop flag flips.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut liveness = tokio::time::interval(self.settings.ping_interval);
        loop {
            tokio::select! {
                _ = sweep.tick() => self.sweep_events().await,
                _ = liveness.tick() => {
                    self.client.expire_idle().await;
                    for entry in self.liveness_pass().await {
                        self.client.evict(&entry.endpoint).await;
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("coordinator background loop stopped");
    }

    /// Ids of events still awaiting partials.
    pub async fn active_event_ids(&self) -> Vec<EventId> {
        self.active.read().await.keys().cloned().collect()
    }

    /// How many partials an active event has collected so far.
    pub async fn partial_count(&self, event_id: &str) -> Option<usize> {
        self.active
            .read()
            .await
            .get(event_id)
            .map(|slot| slot.partials.len())
    }

    async fn finalize(&self, mut slot: ActiveEvent) {
        let outcome = self.aggregate(&slot);
        match &outcome {
            Ok(result) => info!(
                event_id = %slot.event.event_id,
                computation = %slot.event.computation_type,
                %result,
                "event complete"
            ),
            Err(err) => warn!(event_id = %slot.event.event_id, %err, "event failed"),
        }
        if let Some(tx) = slot.result_tx.take() {
            // The announcer may have dropped its receiver; nothing to do.
            let _ = tx.send(outcome);
        }
    }

    fn aggregate(&self, slot: &ActiveEvent) -> EventOutcome {
        let Some(computation) = self.computations.get(&slot.event.computation_type) else {
            return Err(EventOutcomeError::UnknownComputation(
                slot.event.computation_type.clone(),
            ));
        };
        // Canonical participant order, so the computation sees a stable
        // input regardless of submission order.
        let partials: Vec<String> = slot
            .event
            .participants
            .iter()
            .filter_map(|p| slot.partials.get(&p.participant_id).cloned())
            .collect();
        Ok(computation.aggregate(&partials, &slot.event.metadata)?)
    }
}
