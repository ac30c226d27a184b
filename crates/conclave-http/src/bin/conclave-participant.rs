//! Participant binary: registers with the coordinator, serves the
//! participant API and contributes a numeric value to sum events.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use conclave_core::computation::ComputationRegistry;
use conclave_core::crypto::CryptoError;
use conclave_core::sum::{AdditiveSource, AdditiveSum};
use conclave_http::{ParticipantConfig, ParticipantServer};
use rand::Rng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclave-participant", about = "Conclave MPC participant")]
struct Cli {
    /// Path to a JSON config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    coordinator_host: Option<String>,
    #[arg(long)]
    coordinator_port: Option<u16>,
    #[arg(long)]
    listen_host: Option<String>,
    #[arg(long)]
    listen_port: Option<u16>,
    /// Stable participant id; generated per process when absent.
    #[arg(long)]
    id: Option<String>,
    /// Value contributed to sum events; random in 10..=50 when absent.
    #[arg(long)]
    value: Option<f64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

// 2 for broken crypto material, 1 for any other startup failure.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CryptoError>().is_some() {
        2
    } else {
        1
    }
}

#[tokio::main]
async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ParticipantConfig::load(path)?,
        None => ParticipantConfig::default(),
    };
    if let Some(host) = cli.coordinator_host {
        config.coordinator_host = host;
    }
    if let Some(port) = cli.coordinator_port {
        config.coordinator_port = port;
    }
    if let Some(host) = cli.listen_host {
        config.listen_host = host;
    }
    if let Some(port) = cli.listen_port {
        config.listen_port = port;
    }
    if cli.id.is_some() {
        config.participant_id = cli.id;
    }

    let value = cli
        .value
        .unwrap_or_else(|| rand::rng().random_range(10.0f64..=50.0).round());
    info!(value, "contributing value to sum events");

    let computations = ComputationRegistry::new().register("sum", Arc::new(AdditiveSum));
    let server = ParticipantServer::bind(
        &config,
        Box::new(AdditiveSource::new(value)),
        computations,
    )
    .await?;
    let participant = server.participant();

    let stop = server.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            stop.send_replace(true);
        }
    });

    // The coordinator may come up after us; keep trying in the background
    // while the listener already accepts events and peer shares.
    tokio::spawn(async move {
        loop {
            match participant.connect().await {
                Ok(()) => break,
                Err(err) => {
                    warn!(%err, "registration failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    server.serve().await
}
