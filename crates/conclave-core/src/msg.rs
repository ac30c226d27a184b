//! Wire types exchanged between the coordinator and its participants.
//!
//! All messages travel as JSON. The signed messages ([`Event`] and
//! [`PeerShare`]) define canonical ASCII signing payloads so that both sides
//! agree on the exact bytes covered by a signature regardless of JSON field
//! ordering.

use std::fmt::{self, Debug};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Opaque identifier a participant assigns itself at startup.
pub type ParticipantId = String;

/// Opaque identifier the coordinator assigns to an event.
pub type EventId = String;

/// Milliseconds since the unix epoch, as stamped on wire messages.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Age of a wire timestamp relative to the local clock.
///
/// Timestamps from the future count as age zero, so minor clock skew between
/// nodes never makes a fresh message look expired.
pub fn age_of(stamp_millis: u64) -> Duration {
    Duration::from_millis(unix_millis().saturating_sub(stamp_millis))
}

/// A routable network address of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The kind of work an [`Event`] asks its participants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Participants contribute private input and exchange shares.
    DataSubmission,
}

/// A participant as listed inside an [`Event`].
///
/// The entry carries everything a peer needs to talk to this participant and
/// to authenticate messages claiming to come from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EventParticipant {
    pub participant_id: ParticipantId,
    pub endpoint: Endpoint,
    /// Hex-encoded Ed25519 public key of the participant.
    pub public_key: String,
}

/// A coordinator-issued unit of work, immutable once signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub kind: EventKind,
    pub event_id: EventId,
    /// Key into the computation registry on both sides.
    pub computation_type: String,
    /// Selected participants. The ordering is canonical: share assignment and
    /// aggregation both index into this list.
    pub participants: Vec<EventParticipant>,
    /// Opaque bag forwarded to the registered computation. Never inspected by
    /// the core and not covered by the coordinator signature.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Milliseconds since the unix epoch at creation time.
    pub created_at: u64,
    /// Hex-encoded Ed25519 signature over [`Event::signing_payload`].
    pub coordinator_signature: String,
}

impl Event {
    /// The canonical ASCII payload covered by the coordinator signature.
    ///
    /// Deliberately excludes the participant list contents and the metadata:
    /// the signature stays compact at the cost of leaving both
    /// unauthenticated, which is acceptable because neither is confidential.
    pub fn signing_payload(&self) -> String {
        format!(
            "{}|{}|{}",
            self.event_id,
            self.computation_type,
            self.participants.len()
        )
    }

    /// Look up a participant entry by id.
    pub fn participant(&self, id: &str) -> Option<&EventParticipant> {
        self.participants.iter().find(|p| p.participant_id == id)
    }

    /// The position of a participant in the canonical ordering.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.participant_id == id)
    }

    /// Age of the event relative to the local clock.
    pub fn age(&self) -> Duration {
        age_of(self.created_at)
    }
}

/// Body of `POST /connect`: a participant registering with the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectRequest {
    pub participant_id: ParticipantId,
    /// Where the participant listens for `/event` and `/peer-data`.
    pub endpoint: Endpoint,
    /// Hex-encoded Ed25519 public key the participant will sign shares with.
    pub public_key: String,
}

/// Coordinator reply to a [`ConnectRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectAck {
    pub accepted: bool,
    /// The key participants verify event announcements against.
    pub coordinator_public_key: String,
}

/// Body of `POST /submit` and `POST /ping`.
///
/// A submit carries a partial result; a ping reuses the same shape with only
/// `participant_id` meaningful, which keeps the coordinator's ingress parsing
/// uniform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EventResponse {
    pub event_id: EventId,
    pub participant_id: ParticipantId,
    /// The participant's combined partial result, opaque to the coordinator.
    pub partial: String,
    /// Milliseconds since the unix epoch when the message was sent.
    pub sent_at: u64,
}

impl EventResponse {
    /// A liveness ping from `participant_id`.
    pub fn ping(participant_id: impl Into<ParticipantId>) -> Self {
        Self {
            event_id: String::new(),
            participant_id: participant_id.into(),
            partial: String::new(),
            sent_at: unix_millis(),
        }
    }
}

/// Body of `POST /peer-data`: one additive share sent directly to a peer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PeerShare {
    pub event_id: EventId,
    pub from_participant: ParticipantId,
    /// The share payload, exactly as covered by `signature`.
    pub share: String,
    /// Hex-encoded Ed25519 signature over [`PeerShare::signing_payload`].
    pub signature: String,
    /// The full signed event, embedded so a peer that missed the
    /// coordinator's announcement can still join in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_event: Option<Event>,
    /// Milliseconds since the unix epoch when the message was sent.
    pub sent_at: u64,
}

impl PeerShare {
    /// The canonical ASCII payload covered by the sender signature.
    pub fn signing_payload(event_id: &str, from_participant: &str, share: &str) -> String {
        format!("{event_id}|{from_participant}|{share}")
    }

    /// Key under which duplicate deliveries of this share are suppressed.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", self.event_id, self.from_participant)
    }
}

// Shares are secret material, so Debug keeps them out of logs.
impl Debug for PeerShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerShare")
            .field("event_id", &self.event_id)
            .field("from_participant", &self.from_participant)
            .field("share", &"<REDACTED>")
            .field("signature", &self.signature)
            .field(
                "original_event",
                &self.original_event.as_ref().map(|e| &e.event_id),
            )
            .field("sent_at", &self.sent_at)
            .finish()
    }
}
