//! The participant: event reception, share exchange, completion detection
//! and the computation pipeline.
//!
//! A [`Participant`] registers with the coordinator, accepts signed events,
//! contributes its private input as additive shares, collects the shares its
//! peers send, and submits one combined partial result per event. Like the
//! coordinator it only reaches the network through a trait
//! ([`ParticipantClient`]), so the state machine is testable without sockets.
//!
//! Locks nest in a fixed order: events before shards before the recent-item
//! caches. No lock is held across network I/O or the coalescing sleep.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::client::ParticipantClient;
use crate::computation::{ComputationRegistry, DataSource, DataSourceError};
use crate::crypto::{self, CryptoError, Signer};
use crate::msg::{
    ConnectRequest, Endpoint, Event, EventId, EventResponse, ParticipantId, PeerShare, age_of,
    unix_millis,
};
use crate::recent::RecentCache;

#[cfg(test)]
mod tests;

/// Tunables of a [`Participant`].
#[derive(Debug, Clone)]
pub struct ParticipantSettings {
    /// Oldest event (or share) still accepted for processing.
    pub event_timeout: Duration,
    /// Pause between registering an event and fanning out shares, so peers
    /// have likely registered the event before shares reach them.
    pub share_delay: Duration,
    /// How long dedup entries are remembered. Must outlive `event_timeout`,
    /// otherwise a still-valid event could be reprocessed after its dedup
    /// entry expires.
    pub recent_ttl: Duration,
    /// Dedup caches are swept every this many ingress messages.
    pub sweep_every: u32,
    /// Cadence of the liveness ping towards the coordinator.
    pub ping_interval: Duration,
    /// How long the coordinator may stay unreachable before this participant
    /// re-registers. Nothing persists across a coordinator restart, so
    /// re-registering is the only way back into the roster.
    pub coordinator_timeout: Duration,
}

impl Default for ParticipantSettings {
    fn default() -> Self {
        Self {
            event_timeout: Duration::from_secs(30),
            share_delay: Duration::from_millis(100),
            recent_ttl: Duration::from_secs(60),
            sweep_every: 50,
            ping_interval: Duration::from_secs(10),
            coordinator_timeout: Duration::from_secs(30),
        }
    }
}

/// How an incoming event announcement was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Accepted,
    Duplicate,
}

/// How an incoming peer share was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareDisposition {
    /// Stored; more shares are still missing.
    Stored,
    /// Stored and the set is now complete; a finalization task was claimed.
    Completed,
    Duplicate,
    DroppedStale,
    DroppedUnknownEvent,
}

/// Why an event announcement was rejected.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("coordinator public key is not known yet")]
    UnknownCoordinator,
    #[error("event signature rejected")]
    BadSignature(#[source] CryptoError),
    #[error("event is {age_secs}s old, past the acceptance window")]
    Stale { age_secs: u64 },
    #[error("this node is not among the event participants")]
    NotInvited,
    #[error(transparent)]
    Data(#[from] DataSourceError),
}

/// Why a peer share was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("sender {0} is not an event participant")]
    UnauthorizedSender(ParticipantId),
    #[error("share signature rejected")]
    BadSignature(#[source] CryptoError),
}

/// Why registration with the coordinator failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError<E: std::error::Error> {
    #[error("could not reach the coordinator")]
    Transport(#[source] E),
    #[error("coordinator rejected the connection")]
    Rejected,
}

/// The participant state machine.
pub struct Participant<C> {
    id: ParticipantId,
    endpoint: Endpoint,
    settings: ParticipantSettings,
    signer: Signer,
    coordinator_key: RwLock<Option<String>>,
    events: RwLock<HashMap<EventId, Event>>,
    /// Per event: sender id to share, the self-share stored under own id.
    shards: RwLock<HashMap<EventId, HashMap<ParticipantId, String>>>,
    /// Events with a claimed finalization task; guards at-most-once combine.
    computing: Mutex<HashSet<EventId>>,
    recent_events: RecentCache,
    recent_shares: RecentCache,
    data_source: Box<dyn DataSource>,
    computations: ComputationRegistry,
    client: C,
}

impl<C: ParticipantClient> Participant<C> {
    pub fn new(
        id: impl Into<ParticipantId>,
        endpoint: Endpoint,
        settings: ParticipantSettings,
        signer: Signer,
        data_source: Box<dyn DataSource>,
        computations: ComputationRegistry,
        client: C,
    ) -> Self {
        let recent_events = RecentCache::new(settings.recent_ttl, settings.sweep_every);
        let recent_shares = RecentCache::new(settings.recent_ttl, settings.sweep_every);
        Self {
            id: id.into(),
            endpoint,
            settings,
            signer,
            coordinator_key: RwLock::new(None),
            events: RwLock::new(HashMap::new()),
            shards: RwLock::new(HashMap::new()),
            computing: Mutex::new(HashSet::new()),
            recent_events,
            recent_shares,
            data_source,
            computations,
            client,
        }
    }

    /// Preload the coordinator key instead of learning it from `connect`.
    pub fn with_coordinator_key(mut self, public_key: impl Into<String>) -> Self {
        self.coordinator_key = RwLock::new(Some(public_key.into()));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The hex-encoded key peers verify this participant's shares against.
    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    /// Register with the coordinator and learn its public key.
    pub async fn connect(&self) -> Result<(), ConnectError<C::Error>> {
        let request = ConnectRequest {
            participant_id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            public_key: self.signer.public_key_hex(),
        };
        let ack = self
            .client
            .connect(&request)
            .await
            .map_err(ConnectError::Transport)?;
        if !ack.accepted {
            return Err(ConnectError::Rejected);
        }
        info!("connected to coordinator");
        *self.coordinator_key.write().await = Some(ack.coordinator_public_key);
        Ok(())
    }

    /// Handle a signed event announcement.
    ///
    /// `relay` controls whether the outgoing shares embed the signed event
    /// for peer-assisted propagation. Events learned through propagation are
    /// processed with `relay = false`, which keeps propagation one hop deep.
    pub async fn on_event(
        self: Arc<Self>,
        event: Event,
        relay: bool,
    ) -> Result<EventDisposition, EventError> {
        let coordinator_key = self
            .coordinator_key
            .read()
            .await
            .clone()
            .ok_or(EventError::UnknownCoordinator)?;
        crypto::verify(
            &coordinator_key,
            &event.signing_payload(),
            &event.coordinator_signature,
        )
        .map_err(EventError::BadSignature)?;
        let age = event.age();
        if age > self.settings.event_timeout {
            return Err(EventError::Stale {
                age_secs: age.as_secs(),
            });
        }
        let Some(own_index) = event.position_of(&self.id) else {
            return Err(EventError::NotInvited);
        };
        {
            // Mark and register under one lock: a Duplicate answer then
            // implies the event table already has (or had) the entry, so a
            // racing share handler never sees the gap between the two.
            let mut events = self.events.write().await;
            if self.recent_events.check_and_mark(&event.event_id).await {
                debug!(event_id = %event.event_id, "duplicate event dropped");
                return Ok(EventDisposition::Duplicate);
            }
            events
                .entry(event.event_id.clone())
                .or_insert_with(|| event.clone());
        }
        info!(
            event_id = %event.event_id,
            computation = %event.computation_type,
            participants = event.participants.len(),
            relay,
            "event accepted"
        );

        let value = self.data_source.collect(&event)?;
        let shares = self
            .data_source
            .shard(&value, event.participants.len(), &event)?;
        if shares.len() != event.participants.len() {
            return Err(EventError::Data(DataSourceError::Shard(format!(
                "produced {} shares for {} participants",
                shares.len(),
                event.participants.len()
            ))));
        }
        // The self-share lands before any outbound share, so a completion
        // triggered by a fast peer always sees the full set.
        self.shards
            .write()
            .await
            .entry(event.event_id.clone())
            .or_default()
            .insert(self.id.clone(), shares[own_index].clone());

        tokio::time::sleep(self.settings.share_delay).await;
        self.share_with_peers(&event, &shares, relay).await;
        self.clone()
            .maybe_start_compute(event.event_id.clone())
            .await;
        Ok(EventDisposition::Accepted)
    }

    /// Handle one share sent by a peer.
    pub async fn on_peer_share(
        self: Arc<Self>,
        message: PeerShare,
    ) -> Result<ShareDisposition, ShareError> {
        if age_of(message.sent_at) > self.settings.event_timeout {
            debug!(event_id = %message.event_id, "dropping stale share");
            return Ok(ShareDisposition::DroppedStale);
        }
        if self.recent_shares.check_and_mark(&message.dedup_key()).await {
            debug!(
                event_id = %message.event_id,
                sender = %message.from_participant,
                "duplicate share dropped"
            );
            return Ok(ShareDisposition::Duplicate);
        }

        let known = self.events.read().await.contains_key(&message.event_id);
        if !known {
            if let Some(original) = &message.original_event {
                if original.event_id == message.event_id {
                    match self.clone().on_event(original.clone(), false).await {
                        Ok(_) => {}
                        Err(err) => debug!(
                            %err,
                            event_id = %message.event_id,
                            "embedded event rejected"
                        ),
                    }
                } else {
                    warn!(
                        event_id = %message.event_id,
                        embedded = %original.event_id,
                        "embedded event id does not match the share"
                    );
                }
            }
        }
        let Some(event) = self.events.read().await.get(&message.event_id).cloned() else {
            debug!(event_id = %message.event_id, "dropping share for unknown event");
            return Ok(ShareDisposition::DroppedUnknownEvent);
        };

        let Some(sender) = event.participant(&message.from_participant) else {
            warn!(
                event_id = %message.event_id,
                sender = %message.from_participant,
                "rejecting share from unauthorized sender"
            );
            return Err(ShareError::UnauthorizedSender(message.from_participant));
        };
        let payload = PeerShare::signing_payload(
            &message.event_id,
            &message.from_participant,
            &message.share,
        );
        if let Err(err) = crypto::verify(&sender.public_key, &payload, &message.signature) {
            warn!(
                event_id = %message.event_id,
                sender = %message.from_participant,
                "rejecting share with invalid signature"
            );
            return Err(ShareError::BadSignature(err));
        }

        let have = {
            let mut shards = self.shards.write().await;
            let collected = shards.entry(message.event_id.clone()).or_default();
            collected.insert(message.from_participant.clone(), message.share);
            collected.len()
        };
        debug!(
            event_id = %message.event_id,
            have,
            expected = event.participants.len(),
            "share stored"
        );
        if have >= event.participants.len() {
            self.clone()
                .maybe_start_compute(message.event_id.clone())
                .await;
            return Ok(ShareDisposition::Completed);
        }
        Ok(ShareDisposition::Stored)
    }

    /// Drop state of events past the acceptance window.
    ///
    /// Past that window no share for the event is accepted anymore, so the
    /// state cannot make progress again.
    pub async fn expire_events(&self) {
        let expired: Vec<EventId> = self
            .events
            .read()
            .await
            .iter()
            .filter(|(_, event)| event.age() > self.settings.event_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for event_id in expired {
            let claimed = self
                .computing
                .lock()
                .expect("computing set lock poisoned")
                .contains(&event_id);
            if claimed {
                // A finalization task owns this event and discards it.
                continue;
            }
            debug!(event_id = %event_id, "expiring event state");
            self.discard_event(&event_id).await;
        }
    }

    /// Drive the liveness ping and event expiry until the stop flag flips.
    ///
    /// When pings have failed for `coordinator_timeout`, the participant
    /// re-registers; this also covers a coordinator restart, after which the
    /// roster starts empty.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ping = tokio::time::interval(self.settings.ping_interval);
        let mut last_seen = std::time::Instant::now();
        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let beat = EventResponse::ping(self.id.clone());
                    match self.client.ping(&beat).await {
                        Ok(()) => last_seen = std::time::Instant::now(),
                        Err(err) => {
                            warn!(%err, "coordinator ping failed");
                            if last_seen.elapsed() > self.settings.coordinator_timeout {
                                info!("coordinator unreachable too long, re-registering");
                                if self.connect().await.is_ok() {
                                    last_seen = std::time::Instant::now();
                                }
                            }
                        }
                    }
                    self.expire_events().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("participant background loop stopped");
    }

    /// Whether the event is currently registered.
    pub async fn knows_event(&self, event_id: &str) -> bool {
        self.events.read().await.contains_key(event_id)
    }

    /// How many shares (own included) are stored for an event.
    pub async fn shard_count(&self, event_id: &str) -> usize {
        self.shards
            .read()
            .await
            .get(event_id)
            .map_or(0, |collected| collected.len())
    }

    async fn share_with_peers(&self, event: &Event, shares: &[String], relay: bool) {
        let outbound: Vec<_> = event
            .participants
            .iter()
            .enumerate()
            .filter(|(_, peer)| peer.participant_id != self.id)
            .map(|(index, peer)| {
                let share = shares[index].clone();
                let signature = self.signer.sign(&PeerShare::signing_payload(
                    &event.event_id,
                    &self.id,
                    &share,
                ));
                let message = PeerShare {
                    event_id: event.event_id.clone(),
                    from_participant: self.id.clone(),
                    share,
                    signature,
                    original_event: relay.then(|| event.clone()),
                    sent_at: unix_millis(),
                };
                (peer, message)
            })
            .collect();
        let sends = outbound.iter().map(async |(peer, message)| {
            if let Err(err) = self.client.send_share(peer, message).await {
                warn!(
                    %err,
                    peer = %peer.participant_id,
                    endpoint = %peer.endpoint,
                    "share delivery failed"
                );
            }
        });
        futures::future::join_all(sends).await;
    }

    /// Claim the event for finalization and spawn the task, once.
    async fn maybe_start_compute(self: Arc<Self>, event_id: EventId) {
        {
            let events = self.events.read().await;
            let shards = self.shards.read().await;
            let Some(event) = events.get(&event_id) else {
                return;
            };
            let have = shards.get(&event_id).map_or(0, |collected| collected.len());
            if have < event.participants.len() {
                return;
            }
        }
        {
            let mut computing = self.computing.lock().expect("computing set lock poisoned");
            if !computing.insert(event_id.clone()) {
                return;
            }
        }
        info!(event_id = %event_id, "all shares collected, starting computation");
        tokio::spawn(async move { self.compute_and_submit(event_id).await });
    }

    async fn compute_and_submit(&self, event_id: EventId) {
        let collected = {
            let events = self.events.read().await;
            let shards = self.shards.read().await;
            match (events.get(&event_id), shards.get(&event_id)) {
                (Some(event), Some(collected)) => {
                    // Canonical participant order, so combine sees a stable
                    // input regardless of arrival order.
                    let shares: Option<Vec<String>> = event
                        .participants
                        .iter()
                        .map(|p| collected.get(&p.participant_id).cloned())
                        .collect();
                    shares.map(|shares| (event.clone(), shares))
                }
                _ => None,
            }
        };
        let Some((event, shares)) = collected else {
            warn!(event_id = %event_id, "event state vanished before computation");
            self.discard_event(&event_id).await;
            return;
        };

        let partial = match self.computations.get(&event.computation_type) {
            Some(computation) => match computation.combine(&shares, &event.metadata) {
                Ok(partial) => Some(partial),
                Err(err) => {
                    warn!(event_id = %event_id, %err, "combine failed, dropping event");
                    None
                }
            },
            None => {
                warn!(
                    event_id = %event_id,
                    computation = %event.computation_type,
                    "no computation registered, dropping event"
                );
                None
            }
        };
        if let Some(partial) = partial {
            let response = EventResponse {
                event_id: event_id.clone(),
                participant_id: self.id.clone(),
                partial,
                sent_at: unix_millis(),
            };
            info!(event_id = %event_id, "submitting partial result");
            if let Err(err) = self.client.submit(&response).await {
                warn!(
                    %err,
                    event_id = %event_id,
                    "partial submission failed, the coordinator timeout will cover it"
                );
            }
        }
        self.discard_event(&event_id).await;
    }

    async fn discard_event(&self, event_id: &str) {
        self.events.write().await.remove(event_id);
        self.shards.write().await.remove(event_id);
        // Safe to unmark: the recent-events cache outlives the acceptance
        // window, so the event cannot be accepted a second time.
        self.computing
            .lock()
            .expect("computing set lock poisoned")
            .remove(event_id);
    }
}
