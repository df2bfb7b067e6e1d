//! Core types for the chat relay bridge.
//!
//! This crate defines the vocabulary shared by the protocol adapter and the
//! relay server:
//! - `InboundMessage`: a normalized chat message ready for relaying
//! - `BridgeEvent`: the tagged union broadcast to every local peer
//! - `PeerCommand` / `CommandReply`: the peer-to-server command protocol
//! - `BridgeError`: the failure taxonomy surfaced to peers and operators

pub mod command;
pub mod error;
pub mod event;

pub use command::{CommandReply, PeerCommand, SendCommand};
pub use error::{BridgeError, Result};
pub use event::{BridgeEvent, InboundMessage, LinkStatus};
