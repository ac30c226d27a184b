//! The core coordination engine of the conclave MPC platform.
//!
//! A conclave deployment has one coordinator and a fleet of participants.
//! The [`Coordinator`] keeps the roster of connected participants, selects a
//! subset into signed [`Event`]s, announces them, collects partial results
//! and aggregates them into the final answer. Each [`Participant`] accepts
//! events, contributes private input through its [`DataSource`], exchanges
//! additive shares directly with its peers, combines the shares it collected
//! through the registered [`Computation`] and submits the partial back.
//!
//! No participant's raw input ever crosses the wire: only shares do, and an
//! input is reconstructible only by summing all of its shares.
//!
//! The engine is transport-agnostic. Both state machines reach the network
//! exclusively through the traits in [`client`]; an HTTP binding lives in
//! the `conclave-http` crate, and tests drive the same state machines with
//! in-memory clients. Authenticity rests on Ed25519 throughout: the
//! coordinator signs every event it announces, and every peer share is
//! signed by its sender ([`crypto`]).

#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod computation;
pub mod coordinator;
pub mod crypto;
pub mod msg;
pub mod participant;
pub mod recent;
pub mod roster;
pub mod sum;

pub use client::{AnnounceClient, ParticipantClient};
pub use computation::{
    Computation, ComputationError, ComputationRegistry, DataSource, DataSourceError,
};
pub use coordinator::{
    Coordinator, CoordinatorSettings, CreateEventError, EventOutcome, EventOutcomeError,
    SubmitError,
};
pub use crypto::{CryptoError, Signer};
pub use msg::{
    ConnectAck, ConnectRequest, Endpoint, Event, EventId, EventKind, EventParticipant,
    EventResponse, ParticipantId, PeerShare,
};
pub use participant::{
    ConnectError, EventDisposition, EventError, Participant, ParticipantSettings, ShareDisposition,
    ShareError,
};
pub use roster::{Roster, RosterEntry, RosterError};
