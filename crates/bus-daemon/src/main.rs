//! Service Bus daemon entry point.

use anyhow::Result;
use bus_controller::ControllerConfig;
use bus_daemon::{init_tracing, Daemon};
use service_bus::BusConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let bus_config = BusConfig::from_env()?;
    let controller_config = ControllerConfig::from_env()?;
    info!(
        transport = %bus_config.transport,
        data_dir = %bus_config.base_dir.display(),
        port = controller_config.bind_addr.port(),
        "Starting service bus"
    );

    let daemon = Daemon::start(bus_config, controller_config).await?;

    info!("Service bus is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    daemon.shutdown().await?;
    Ok(())
}
