//! Protocol client adapter for the chat relay bridge.
//!
//! Provides:
//! - A single managed session with the chat network, redialled after drops
//! - Credential persistence across restarts
//! - Normalization of raw library messages into `InboundMessage`s
//! - A `ProtocolTransport` seam, with a WebSocket gateway implementation

pub mod adapter;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod message;
pub mod qr;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use adapter::{AdapterConfig, AdapterState, ProtocolAdapter};
pub use credentials::{CredentialStore, Credentials};
pub use error::{AdapterError, AdapterResult};
pub use gateway::{GatewayConfig, GatewayTransport};
pub use message::{extract_content, normalize, RawMessage, UpsertKind};
pub use transport::{
    CloseInfo, ProtocolTransport, TransportCommand, TransportEvent, TransportSession,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider.
/// Must be called before dialling a `wss://` gateway.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
