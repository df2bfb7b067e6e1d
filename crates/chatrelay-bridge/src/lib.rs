//! Chat relay bridge.
//!
//! Wires the components into one process:
//! - `GatewayTransport` session with the chat network
//! - `ProtocolAdapter` managing pairing, reconnects and credentials
//! - `RelayServer` fanning events out to local WebSocket peers

pub mod app;
pub mod config;
pub mod error;

pub use app::{shutdown_signal, Application};
pub use config::BridgeConfig;
pub use error::{AppError, AppResult};
