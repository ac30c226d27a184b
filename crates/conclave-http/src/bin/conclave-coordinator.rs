//! Coordinator binary: serves the coordinator API and periodically announces
//! a sum event over the connected fleet.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use conclave_core::computation::ComputationRegistry;
use conclave_core::crypto::CryptoError;
use conclave_core::sum::AdditiveSum;
use conclave_http::{CoordinatorConfig, CoordinatorServer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "conclave-coordinator", about = "Conclave MPC coordinator")]
struct Cli {
    /// Path to a JSON config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    min_participants: Option<usize>,
    #[arg(long)]
    max_participants: Option<usize>,
    /// Seconds between announce rounds.
    #[arg(long)]
    announce_interval: Option<u64>,
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
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(min) = cli.min_participants {
        config.min_participants = min;
    }
    if let Some(max) = cli.max_participants {
        config.max_participants = max;
    }
    if let Some(interval) = cli.announce_interval {
        config.event_announce_interval = interval;
    }

    let computations = ComputationRegistry::new().register("sum", Arc::new(AdditiveSum));
    let server = CoordinatorServer::bind(&config, computations).await?;
    let coordinator = server.coordinator();

    let stop = server.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            stop.send_replace(true);
        }
    });

    let announce_interval = Duration::from_secs(config.event_announce_interval);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(announce_interval);
        // skip the immediate first tick so participants can register
        interval.tick().await;
        loop {
            interval.tick().await;
            let event_id = format!("event-{}", Uuid::new_v4());
            match coordinator
                .create_event(&event_id, "sum", serde_json::json!({}))
                .await
            {
                Err(err) => debug!(%err, "skipping announce round"),
                Ok(event) => {
                    info!(event_id, participants = event.participants.len(), "announcing event");
                    let outcome = coordinator.announce(event).await;
                    tokio::spawn(async move {
                        match outcome.await {
                            Ok(Ok(result)) => info!(event_id, result, "final result"),
                            Ok(Err(err)) => warn!(event_id, %err, "event produced no result"),
                            // Coordinator dropped while shutting down.
                            Err(_) => {}
                        }
                    });
                }
            }
        }
    });

    server.serve().await
}
