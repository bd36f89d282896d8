//! Network-layer error types.

use netsync_component::ConnectionId;
use netsync_wire::WireError;

use crate::catalog::MessageType;

/// Errors raised by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Another transport is already listening on the address.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// Nothing is listening on the address.
    #[error("connection refused: nothing listening on {0}")]
    Refused(String),

    /// The listener is at its connection limit.
    #[error("listener {address} is full ({max} connections)")]
    Full {
        /// Listener address.
        address: String,
        /// Configured maximum.
        max: usize,
    },

    /// The connection is closed or was never opened by this transport.
    #[error("unknown or closed connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Errors that can occur while framing or dispatching messages.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Malformed or truncated payload.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// No handler is registered for the message type.
    #[error("no handler registered for {0}")]
    UnknownMessage(MessageType),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A handler refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl NetError {
    /// Convenience constructor for [`NetError::Rejected`].
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        Self::Rejected(reason.to_string())
    }
}
