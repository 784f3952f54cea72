//! Starwake Server
//!
//! Authoritative simulation server. Configuration comes from the
//! environment (and `.env` when present).

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use starwake::{
    config::ServerConfig,
    network::server::GameServer,
    TICK_RATE, VERSION,
};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("Failed to read .env");
        }
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    info!("Starwake Server v{}", VERSION);
    if config.sim.tick_rate != TICK_RATE {
        warn!("Tick rate overridden: {} Hz", config.sim.tick_rate);
    }
    info!(
        "Tick Rate: {} Hz, snapshots every {} steps ({} Hz)",
        config.sim.tick_rate,
        config.sim.snapshot_every_steps,
        config.sim.server_update_hz()
    );

    let server = GameServer::new(config);
    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            return result.context("Server stopped");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    run.await.context("Server stopped")?;
    // Let connection tasks flush their shutdown notice.
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}
