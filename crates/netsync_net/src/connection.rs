//! Per-peer connection state.

use std::collections::BTreeSet;
use std::time::Instant;

use bytes::Bytes;
use netsync_component::{ConnectionId, NetworkId};
use tracing::warn;

use crate::dispatch::MessageHandlers;
use crate::error::NetError;
use crate::frame;
use crate::messages::NetworkMessage;
use crate::transport::{Channel, Transport};

/// One remote peer as seen by a server or a client.
///
/// `S` is the state the connection's handlers run against.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnectionId,
    address: String,
    is_ready: bool,
    is_open: bool,
    observing: BTreeSet<NetworkId>,
    owned: BTreeSet<NetworkId>,
    player: Option<NetworkId>,
    last_message: Option<Instant>,
    handlers: MessageHandlers<S>,
}

impl<S> Connection<S> {
    /// A new, not yet ready connection.
    #[must_use]
    pub fn new(id: ConnectionId, address: impl Into<String>, handlers: MessageHandlers<S>) -> Self {
        Self {
            id,
            address: address.into(),
            is_ready: false,
            is_open: true,
            observing: BTreeSet::new(),
            owned: BTreeSet::new(),
            player: None,
            last_message: None,
            handlers,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether this peer receives spawn and state traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.is_ready = ready;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Mark the connection closed. Returns `true` the first time only.
    pub fn close(&mut self) -> bool {
        std::mem::replace(&mut self.is_open, false)
    }

    /// Entities this connection currently observes.
    #[must_use]
    pub fn observing(&self) -> &BTreeSet<NetworkId> {
        &self.observing
    }

    pub fn add_observing(&mut self, id: NetworkId) -> bool {
        self.observing.insert(id)
    }

    pub fn remove_observing(&mut self, id: NetworkId) -> bool {
        self.observing.remove(&id)
    }

    pub fn take_observing(&mut self) -> BTreeSet<NetworkId> {
        std::mem::take(&mut self.observing)
    }

    /// Entities this connection holds authority over.
    #[must_use]
    pub fn owned(&self) -> &BTreeSet<NetworkId> {
        &self.owned
    }

    pub fn add_owned(&mut self, id: NetworkId) -> bool {
        self.owned.insert(id)
    }

    pub fn remove_owned(&mut self, id: NetworkId) -> bool {
        self.owned.remove(&id)
    }

    pub fn take_owned(&mut self) -> BTreeSet<NetworkId> {
        std::mem::take(&mut self.owned)
    }

    /// This connection's player object.
    #[must_use]
    pub fn player(&self) -> Option<NetworkId> {
        self.player
    }

    pub fn set_player(&mut self, player: Option<NetworkId>) {
        self.player = player;
    }

    /// When the last message from this peer was handled.
    #[must_use]
    pub fn last_message(&self) -> Option<Instant> {
        self.last_message
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_message = Some(now);
    }

    #[must_use]
    pub fn handlers(&self) -> &MessageHandlers<S> {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut MessageHandlers<S> {
        &mut self.handlers
    }

    /// Frame and send `message`.
    ///
    /// Frames larger than the channel's limit are logged and sent anyway.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the connection is closed.
    pub fn send<M: NetworkMessage>(
        &self,
        transport: &mut dyn Transport,
        channel: Channel,
        message: &M,
    ) -> Result<(), NetError> {
        let frame = frame::pack(message)?;
        self.send_frame(transport, channel, frame)
    }

    /// Send an already framed buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn send_frame(
        &self,
        transport: &mut dyn Transport,
        channel: Channel,
        frame: Bytes,
    ) -> Result<(), NetError> {
        let limit = transport.max_packet_size(channel);
        if frame.len() > limit {
            warn!(
                connection = %self.id,
                size = frame.len(),
                limit,
                ?channel,
                "frame exceeds the channel's packet size; sending unfragmented"
            );
        }
        transport.send(self.id, channel, frame)?;
        Ok(())
    }
}
