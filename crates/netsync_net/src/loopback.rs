//! In-process transport.
//!
//! A [`LoopbackHub`] plays the role of the network: transports created from
//! the same hub can listen on string addresses and connect to each other.
//! Every transport owns an unbounded `tokio` channel as its inbox; the hub
//! keeps a concurrent route table from connection id to the peer's inbox, so
//! transports may live on different threads.
//!
//! Connection ids are unique across the whole hub. Each connection has two
//! ids, one per side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use netsync_component::ConnectionId;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transport::{Channel, Transport, TransportEvent};

/// Default largest reliable frame.
pub const DEFAULT_RELIABLE_MTU: usize = 16 * 1024;

/// Default largest unreliable frame.
pub const DEFAULT_UNRELIABLE_MTU: usize = 1200;

#[derive(Debug)]
struct Listener {
    owner: u64,
    inbox: UnboundedSender<TransportEvent>,
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

/// Queue `event` on `inbox`. Returns `false` if the receiving transport is
/// gone.
fn deliver(inbox: &UnboundedSender<TransportEvent>, event: TransportEvent) -> bool {
    match inbox.send(event) {
        Ok(()) => true,
        Err(err) => {
            debug!(event = ?err.0, "loopback inbox closed; event dropped");
            false
        }
    }
}

#[derive(Debug)]
struct Route {
    owner: u64,
    peer: ConnectionId,
    peer_inbox: UnboundedSender<TransportEvent>,
    active: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct HubInner {
    listeners: DashMap<String, Listener>,
    routes: DashMap<ConnectionId, Route>,
    next_connection: AtomicU64,
    next_transport: AtomicU64,
}

/// A shared in-memory network.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this hub.
    #[must_use]
    pub fn transport(&self) -> LoopbackTransport {
        let (inbox_tx, inbox_rx) = unbounded_channel();
        LoopbackTransport {
            id: self.inner.next_transport.fetch_add(1, Ordering::Relaxed) + 1,
            hub: Arc::clone(&self.inner),
            inbox_tx,
            inbox_rx,
            listening: None,
            reliable_mtu: DEFAULT_RELIABLE_MTU,
            unreliable_mtu: DEFAULT_UNRELIABLE_MTU,
        }
    }

    /// Number of open connection ends (two per connection).
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.inner.routes.len()
    }
}

/// One endpoint on a [`LoopbackHub`].
#[derive(Debug)]
pub struct LoopbackTransport {
    id: u64,
    hub: Arc<HubInner>,
    inbox_tx: UnboundedSender<TransportEvent>,
    inbox_rx: UnboundedReceiver<TransportEvent>,
    listening: Option<String>,
    reliable_mtu: usize,
    unreliable_mtu: usize,
}

impl LoopbackTransport {
    /// Override the frame size limit reported for `channel`.
    #[must_use]
    pub fn with_max_packet_size(mut self, channel: Channel, size: usize) -> Self {
        match channel {
            Channel::Reliable => self.reliable_mtu = size,
            Channel::Unreliable => self.unreliable_mtu = size,
        }
        self
    }

    /// Address this transport listens on, if any.
    #[must_use]
    pub fn local_address(&self) -> Option<&str> {
        self.listening.as_deref()
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.hub.next_connection.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn owned_connections(&self) -> Vec<ConnectionId> {
        self.hub
            .routes
            .iter()
            .filter(|route| route.owner == self.id)
            .map(|route| *route.key())
            .collect()
    }
}

impl Transport for LoopbackTransport {
    fn listen(&mut self, address: &str, max_connections: usize) -> Result<(), TransportError> {
        match self.hub.listeners.entry(address.to_string()) {
            Entry::Occupied(_) => return Err(TransportError::AddressInUse(address.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Listener {
                    owner: self.id,
                    inbox: self.inbox_tx.clone(),
                    max_connections,
                    active: Arc::new(AtomicUsize::new(0)),
                });
            }
        }
        info!(address, max_connections, "loopback listening");
        self.listening = Some(address.to_string());
        Ok(())
    }

    fn connect(&mut self, address: &str) -> Result<ConnectionId, TransportError> {
        let (owner, inbox, active) = {
            let listener = self
                .hub
                .listeners
                .get(address)
                .ok_or_else(|| TransportError::Refused(address.to_string()))?;
            if listener.active.load(Ordering::Acquire) >= listener.max_connections {
                return Err(TransportError::Full {
                    address: address.to_string(),
                    max: listener.max_connections,
                });
            }
            listener.active.fetch_add(1, Ordering::AcqRel);
            (
                listener.owner,
                listener.inbox.clone(),
                Arc::clone(&listener.active),
            )
        };

        let local = self.next_connection_id();
        let remote = self.next_connection_id();
        self.hub.routes.insert(
            local,
            Route {
                owner: self.id,
                peer: remote,
                peer_inbox: inbox.clone(),
                active: Arc::clone(&active),
            },
        );
        self.hub.routes.insert(
            remote,
            Route {
                owner,
                peer: local,
                peer_inbox: self.inbox_tx.clone(),
                active,
            },
        );

        deliver(&inbox, TransportEvent::Connected(remote));
        deliver(&self.inbox_tx, TransportEvent::Connected(local));
        debug!(address, %local, %remote, "loopback connected");
        Ok(local)
    }

    fn send(&mut self, connection: ConnectionId, channel: Channel, frame: Bytes) -> Result<(), TransportError> {
        let route = self
            .hub
            .routes
            .get(&connection)
            .filter(|route| route.owner == self.id)
            .ok_or(TransportError::UnknownConnection(connection))?;
        route
            .peer_inbox
            .send(TransportEvent::Data(route.peer, channel, frame))
            .map_err(|_| TransportError::UnknownConnection(connection))
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inbox_rx.try_recv().ok()
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        let Some((_, route)) = self
            .hub
            .routes
            .remove_if(&connection, |_, route| route.owner == self.id)
        else {
            return;
        };
        self.hub.routes.remove(&route.peer);
        route.active.fetch_sub(1, Ordering::AcqRel);
        deliver(&self.inbox_tx, TransportEvent::Disconnected(connection));
        deliver(&route.peer_inbox, TransportEvent::Disconnected(route.peer));
        debug!(%connection, peer = %route.peer, "loopback disconnected");
    }

    fn max_packet_size(&self, channel: Channel) -> usize {
        match channel {
            Channel::Reliable => self.reliable_mtu,
            Channel::Unreliable => self.unreliable_mtu,
        }
    }

    fn shutdown(&mut self) {
        if let Some(address) = self.listening.take() {
            self.hub
                .listeners
                .remove_if(&address, |_, listener| listener.owner == self.id);
        }
        for connection in self.owned_connections() {
            self.disconnect(connection);
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(transport: &mut LoopbackTransport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| transport.poll_event()).collect()
    }

    #[test]
    fn test_connect_and_exchange() {
        let hub = LoopbackHub::new();
        let mut server = hub.transport();
        let mut client = hub.transport();
        server.listen("game", 4).unwrap();

        let local = client.connect("game").unwrap();
        assert_eq!(drain(&mut client), vec![TransportEvent::Connected(local)]);
        let events = drain(&mut server);
        let [TransportEvent::Connected(remote)] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };
        assert_ne!(*remote, local);

        client.send(local, Channel::Reliable, Bytes::from_static(b"up")).unwrap();
        server.send(*remote, Channel::Unreliable, Bytes::from_static(b"down")).unwrap();
        assert_eq!(
            drain(&mut server),
            vec![TransportEvent::Data(*remote, Channel::Reliable, Bytes::from_static(b"up"))]
        );
        assert_eq!(
            drain(&mut client),
            vec![TransportEvent::Data(local, Channel::Unreliable, Bytes::from_static(b"down"))]
        );
    }

    #[test]
    fn test_refused_and_full() {
        let hub = LoopbackHub::new();
        let mut server = hub.transport();
        let mut a = hub.transport();
        let mut b = hub.transport();
        assert_eq!(a.connect("nowhere"), Err(TransportError::Refused("nowhere".into())));

        server.listen("game", 1).unwrap();
        a.connect("game").unwrap();
        assert!(matches!(b.connect("game"), Err(TransportError::Full { max: 1, .. })));
    }

    #[test]
    fn test_address_in_use() {
        let hub = LoopbackHub::new();
        let mut first = hub.transport();
        let mut second = hub.transport();
        first.listen("game", 1).unwrap();
        assert_eq!(second.listen("game", 1), Err(TransportError::AddressInUse("game".into())));
    }

    #[test]
    fn test_disconnect_notifies_both_sides_once() {
        let hub = LoopbackHub::new();
        let mut server = hub.transport();
        let mut client = hub.transport();
        server.listen("game", 4).unwrap();
        let local = client.connect("game").unwrap();
        drain(&mut client);
        let remote = match drain(&mut server).as_slice() {
            [TransportEvent::Connected(id)] => *id,
            other => panic!("unexpected events: {other:?}"),
        };

        client.disconnect(local);
        client.disconnect(local);
        assert_eq!(drain(&mut client), vec![TransportEvent::Disconnected(local)]);
        assert_eq!(drain(&mut server), vec![TransportEvent::Disconnected(remote)]);
        assert_eq!(hub.route_count(), 0);
        assert_eq!(
            client.send(local, Channel::Reliable, Bytes::new()),
            Err(TransportError::UnknownConnection(local))
        );

        // The slot is free again.
        let mut again = hub.transport();
        assert!(again.connect("game").is_ok());
    }

    #[test]
    fn test_cannot_close_foreign_connection() {
        let hub = LoopbackHub::new();
        let mut server = hub.transport();
        let mut client = hub.transport();
        let mut intruder = hub.transport();
        server.listen("game", 4).unwrap();
        let local = client.connect("game").unwrap();
        intruder.disconnect(local);
        assert_eq!(hub.route_count(), 2);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let hub = LoopbackHub::new();
        let mut server = hub.transport();
        let mut client = hub.transport();
        server.listen("game", 4).unwrap();
        let local = client.connect("game").unwrap();
        drain(&mut client);

        server.shutdown();
        assert_eq!(hub.route_count(), 0);
        assert_eq!(drain(&mut client), vec![TransportEvent::Disconnected(local)]);
        assert!(matches!(client.connect("game"), Err(TransportError::Refused(_))));
    }

    #[test]
    fn test_deliver_to_closed_inbox() {
        let (tx, rx) = unbounded_channel();
        assert!(deliver(&tx, TransportEvent::Connected(ConnectionId(1))));
        drop(rx);
        assert!(!deliver(&tx, TransportEvent::Connected(ConnectionId(2))));
    }

    #[test]
    fn test_packet_size_override() {
        let hub = LoopbackHub::new();
        let transport = hub.transport().with_max_packet_size(Channel::Reliable, 64);
        assert_eq!(transport.max_packet_size(Channel::Reliable), 64);
        assert_eq!(transport.max_packet_size(Channel::Unreliable), DEFAULT_UNRELIABLE_MTU);
    }
}
