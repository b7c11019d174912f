use std::sync::Arc;

use anyhow::Context;

use seatrelay::cipher::SatelliteKey;
use seatrelay::config::SatelliteConfig;
use seatrelay::dispatcher::{PostOffice, spawn_satellite};
use seatrelay::registry::WorkerRegistry;
use seatrelay::worker::JoinWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = SatelliteConfig::from_env();
    let key = SatelliteKey::load(&config.public_key_path)?;

    let workers = Arc::new(WorkerRegistry::new());
    workers
        .register("join", Arc::new(JoinWorker::default()))
        .context("registering join worker")?;

    eprintln!("Seatrelay Satellite v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(server = %config.server, "Fetching tasks");
    tracing::info!(handlers = ?workers.names(), routines = config.routines, "Available handlers");

    let office = Arc::new(PostOffice::new(&config.server, workers.names(), key));

    let mut routines = Vec::with_capacity(config.routines);
    for _ in 0..config.routines {
        routines.push(spawn_satellite(
            Arc::clone(&office),
            Arc::clone(&workers),
            config.delay,
            config.silent,
        ));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    for (handle, shutdown) in routines {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        handle.abort();
    }

    Ok(())
}
