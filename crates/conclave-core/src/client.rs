//! Transport seams between the state machines and the network.
//!
//! The coordination engine never talks to the network directly: the
//! coordinator fans out announcements through an [`AnnounceClient`] and a
//! participant reaches its peers and the coordinator through a
//! [`ParticipantClient`]. The HTTP binding provides the production
//! implementations; tests wire the traits up with in-memory channels.

use crate::msg::{ConnectAck, ConnectRequest, Endpoint, Event, EventParticipant, EventResponse, PeerShare};

/// Outbound calls the coordinator makes to participants.
pub trait AnnounceClient: Send + Sync + 'static {
    /// Transport error for a failed delivery attempt.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Deliver a signed event announcement to one participant.
    fn announce(
        &self,
        to: &EventParticipant,
        event: &Event,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Drop any cached connection state for an endpoint, called when the
    /// owning participant is evicted from the roster.
    fn evict(&self, _to: &Endpoint) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Reap idle cached connections, called from the liveness loop.
    fn expire_idle(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Outbound calls a participant makes to the coordinator and to its peers.
pub trait ParticipantClient: Send + Sync + 'static {
    /// Transport error for a failed delivery attempt.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register with the coordinator.
    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = Result<ConnectAck, Self::Error>> + Send;

    /// Deliver one signed share directly to a peer.
    fn send_share(
        &self,
        to: &EventParticipant,
        share: &PeerShare,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Submit a combined partial result to the coordinator.
    fn submit(
        &self,
        response: &EventResponse,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Liveness ping to the coordinator.
    fn ping(
        &self,
        response: &EventResponse,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
