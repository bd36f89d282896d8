//! # netsync_net
//!
//! Messaging layer of the netsync replication protocol.
//!
//! This crate provides:
//!
//! - [`catalog`] — reserved [`MessageType`] values shared by every peer.
//! - [`messages`] — protocol payloads and the [`NetworkMessage`] trait.
//! - [`frame`] — `varint(type) || payload` framing.
//! - [`dispatch`] — [`MessageHandlers`], the per-connection handler table.
//! - [`connection`] — [`Connection`], per-peer readiness and bookkeeping.
//! - [`transport`] — the [`Transport`] contract the core drives each tick.
//! - [`loopback`] — an in-process [`Transport`] over `tokio` channels.
//! - [`error`] — network-layer error types.

pub mod catalog;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod loopback;
pub mod messages;
pub mod transport;

pub use catalog::MessageType;
pub use connection::Connection;
pub use dispatch::{Handler, MessageHandlers, Route};
pub use error::{NetError, TransportError};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use messages::NetworkMessage;
pub use transport::{Channel, Transport, TransportEvent};
