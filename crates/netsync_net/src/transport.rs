//! The transport contract.
//!
//! The replication core never touches sockets. It drives a [`Transport`] once
//! per tick: it drains events with [`Transport::poll_event`] in a bounded loop
//! and pushes outbound frames with [`Transport::send`].

use bytes::Bytes;
use netsync_component::ConnectionId;

use crate::error::TransportError;

/// Delivery guarantees requested for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// Ordered and reliable within this channel.
    #[default]
    Reliable,
    /// May be dropped or reordered.
    Unreliable,
}

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(ConnectionId),
    /// One complete frame.
    Data(ConnectionId, Channel, Bytes),
    Disconnected(ConnectionId),
}

/// A message-oriented transport.
///
/// Implementations may run I/O on other threads but must hand events to the
/// core through `poll_event`, from the thread that owns the core.
pub trait Transport {
    /// Accept incoming connections on `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    fn listen(&mut self, address: &str, max_connections: usize) -> Result<(), TransportError>;

    /// Open a connection to a listener.
    ///
    /// A [`TransportEvent::Connected`] is queued once the connection is up.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener is unreachable or full.
    fn connect(&mut self, address: &str) -> Result<ConnectionId, TransportError>;

    /// Queue one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open.
    fn send(&mut self, connection: ConnectionId, channel: Channel, frame: Bytes) -> Result<(), TransportError>;

    /// Next pending event, if any. Never blocks.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Close a connection. Closing an unknown or already closed connection
    /// is a no-op.
    fn disconnect(&mut self, connection: ConnectionId);

    /// Largest frame the channel carries without fragmentation.
    fn max_packet_size(&self, channel: Channel) -> usize;

    /// Stop listening and close every connection.
    fn shutdown(&mut self);
}
