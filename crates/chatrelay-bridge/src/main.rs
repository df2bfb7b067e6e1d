//! Chat relay bridge - Entry Point
//!
//! Configuration comes from `BRIDGE_*` environment variables. Runs until
//! SIGINT or SIGTERM, then shuts down cleanly.

use anyhow::Result;
use chatrelay_bridge::{shutdown_signal, Application, BridgeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Must precede any wss:// gateway connection
    chatrelay_ws::init_crypto();

    chatrelay_telemetry::init_logging()?;

    info!("Starting chatrelay bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::from_env()?;
    info!(
        host = %config.host,
        port = config.port,
        gateway = %config.gateway_url,
        reconnect_delay_ms = config.reconnect_delay_ms,
        "Configuration loaded"
    );

    let mut app = Application::new(config);
    app.start().await?;

    let signal = shutdown_signal().await?;
    info!(signal, "Shutdown signal received");
    app.stop().await;

    Ok(())
}
