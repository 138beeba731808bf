use anyhow::Context;
use fleet_guardian::{AdminApi, FleetController};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_CONFIG_PATH: &str = "fleet-guardian.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG selects the level; targets show the emitting module
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!(config_path = %config_path, "Starting Fleet Guardian");

    let controller = Arc::new(
        FleetController::from_config_file(&config_path)
            .with_context(|| format!("failed to load {}", config_path))?,
    );
    info!(
        servers = controller.list_servers()?.len(),
        "Registry loaded"
    );

    controller.start_guardian()?;

    let api = if controller.config().api.is_some() {
        let handle = AdminApi::start(Arc::clone(&controller))
            .await
            .context("failed to start admin API")?;
        info!(addrs = ?handle.addrs(), "Admin API listening");
        Some(handle)
    } else {
        warn!("No api section configured, running the Guardian only");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl+C")?;
    info!("Shutting down");

    if let Some(api) = api {
        api.shutdown().await?;
    }
    controller.stop_guardian()?;

    Ok(())
}
