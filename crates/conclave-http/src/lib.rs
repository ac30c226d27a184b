//! HTTP binding for the conclave MPC platform.
//!
//! This crate puts the state machines of [`conclave_core`] on the network:
//! axum routers and servers for both roles, reqwest-backed implementations
//! of the core transport traits, and validated configuration. The
//! `conclave-coordinator` and `conclave-participant` binaries are thin CLI
//! wrappers around [`CoordinatorServer`] and [`ParticipantServer`].

mod api;
mod config;
mod http_client;
mod pool;
mod router;
mod server;

pub use config::{ConfigError, CoordinatorConfig, ParticipantConfig, TlsConfig};
pub use http_client::{HttpAnnounceClient, HttpClientError, HttpParticipantClient};
pub use pool::{ClientPool, PoolError};
pub use server::{
    CoordinatorServer, ParticipantServer, coordinator_service, participant_service,
};

/// Serialize an error and its source chain as one readable string, so API
/// error responses carry the underlying cause, not just the top layer.
fn serialize_error_chain<S>(
    err: &(dyn std::error::Error + 'static),
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_error_chain(err))
}

fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("  caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::format_error_chain;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn chain_lists_every_cause() {
        let rendered = format_error_chain(&Outer(Inner));
        assert_eq!(rendered, "outer failure\n  caused by: inner failure");
    }

    #[test]
    fn single_errors_render_as_one_line() {
        assert_eq!(format_error_chain(&Inner), "inner failure");
    }
}
