//! Main application wiring.

use std::net::SocketAddr;

use chatrelay_server::RelayServer;
use chatrelay_ws::{AdapterState, CredentialStore, GatewayTransport, ProtocolAdapter};
use tracing::info;

use crate::config::BridgeConfig;
use crate::error::AppResult;

/// The bridge process: one adapter session relayed to local peers.
pub struct Application {
    config: BridgeConfig,
    server: RelayServer<GatewayTransport>,
}

impl Application {
    pub fn new(config: BridgeConfig) -> Self {
        let store = CredentialStore::new(&config.auth_dir);
        let transport = GatewayTransport::new(config.gateway_config());
        let (adapter, events) = ProtocolAdapter::new(config.adapter_config(), transport, store);
        let server = RelayServer::new(config.relay_config(), adapter, events);

        Self { config, server }
    }

    /// Start the relay and begin connecting to the chat network.
    ///
    /// Returns the address peers should connect to.
    pub async fn start(&mut self) -> AppResult<SocketAddr> {
        let addr = self.server.start().await?;
        info!(
            %addr,
            gateway = %self.config.gateway_url,
            auth_dir = %self.config.auth_dir.display(),
            "Bridge started"
        );
        Ok(addr)
    }

    /// Close peers, stop listening and disconnect from the network.
    pub async fn stop(&mut self) {
        info!("Stopping bridge");
        self.server.stop().await;
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.server.adapter().state()
    }

    pub fn peer_count(&self) -> usize {
        self.server.registry().len()
    }
}

/// Wait for SIGINT or SIGTERM. Returns the signal name.
#[cfg(unix)]
pub async fn shutdown_signal() -> AppResult<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Wait for Ctrl-C. Returns the signal name.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> AppResult<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}
