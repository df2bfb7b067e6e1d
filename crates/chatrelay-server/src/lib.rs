//! Local WebSocket relay for the chat relay bridge.
//!
//! Every adapter event is broadcast to all connected peers; peer commands
//! are forwarded to the adapter and answered to the issuing peer only.
//!
//! ```text
//!  chat network ──▶ ProtocolAdapter ──events──▶ broadcast pump ──▶ PeerRegistry ──▶ peers
//!                         ▲                                                          │
//!                         └──────────────── send_message ◀── peer command ◀──────────┘
//! ```
//!
//! Routes:
//! - `GET /` and `GET /ws`: WebSocket upgrade
//! - `GET /metrics`: Prometheus text exposition

mod config;
mod error;
mod registry;
mod server;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use registry::{BroadcastOutcome, PeerRegistration, PeerRegistry};
pub use server::RelayServer;
