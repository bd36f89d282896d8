//! Message-type → handler tables.
//!
//! A [`MessageHandlers`] maps each [`MessageType`] to a closure that receives
//! the owning state `S` (a server or a client), the sending connection and a
//! reader over the payload. Typed registration decodes the payload and
//! requires it to be consumed exactly.
//!
//! Handlers are reference-counted so the caller can clone one out of a table
//! that lives inside `S` and then call it with `&mut S`.

use std::collections::HashMap;
use std::rc::Rc;

use netsync_component::ConnectionId;
use netsync_wire::NetworkReader;
use tracing::warn;

use crate::catalog::MessageType;
use crate::error::NetError;
use crate::frame;
use crate::messages::NetworkMessage;

/// A type-erased message handler.
pub type Handler<S> = Rc<dyn Fn(&mut S, ConnectionId, &mut NetworkReader<'_>) -> Result<(), NetError>>;

/// A handler table for state `S`.
pub struct MessageHandlers<S> {
    table: HashMap<MessageType, Handler<S>>,
}

impl<S> MessageHandlers<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Register a handler for message `M`, replacing any previous one.
    pub fn register<M, F>(&mut self, handler: F)
    where
        M: NetworkMessage + 'static,
        F: Fn(&mut S, ConnectionId, M) -> Result<(), NetError> + 'static,
    {
        self.register_raw(M::TYPE, move |state, conn, reader| {
            let message = M::decode(reader)?;
            reader.finish()?;
            handler(state, conn, message)
        });
    }

    /// Register a handler that reads the payload itself.
    pub fn register_raw<F>(&mut self, message_type: MessageType, handler: F)
    where
        F: Fn(&mut S, ConnectionId, &mut NetworkReader<'_>) -> Result<(), NetError> + 'static,
    {
        if self.table.insert(message_type, Rc::new(handler)).is_some() {
            warn!(%message_type, "replacing existing message handler");
        }
    }

    /// Remove the handler for `message_type`. Returns `true` if one existed.
    pub fn unregister(&mut self, message_type: MessageType) -> bool {
        self.table.remove(&message_type).is_some()
    }

    #[must_use]
    pub fn contains(&self, message_type: MessageType) -> bool {
        self.table.contains_key(&message_type)
    }

    /// A clone of the handler for `message_type`.
    #[must_use]
    pub fn get(&self, message_type: MessageType) -> Option<Handler<S>> {
        self.table.get(&message_type).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Unframe `buffer` and pick its handler.
    ///
    /// The returned [`Route`] borrows only the buffer, so the caller can
    /// release the table before running the handler against `state`.
    ///
    /// # Errors
    ///
    /// Returns a wire error for a malformed frame or
    /// [`NetError::UnknownMessage`] if no handler matches. The caller is
    /// expected to log and drop; the buffer is never resumed.
    pub fn route<'b>(&self, buffer: &'b [u8]) -> Result<Route<'b, S>, NetError> {
        let (message_type, reader) = frame::unpack(buffer)?;
        let handler = self
            .get(message_type)
            .ok_or(NetError::UnknownMessage(message_type))?;
        Ok(Route {
            message_type,
            handler,
            reader,
        })
    }
}

/// A framed message matched to its handler, ready to run.
pub struct Route<'b, S> {
    message_type: MessageType,
    handler: Handler<S>,
    reader: NetworkReader<'b>,
}

impl<S> Route<'_, S> {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Run the handler against `state` for a message from `conn`.
    ///
    /// # Errors
    ///
    /// Whatever the handler returns.
    pub fn run(mut self, state: &mut S, conn: ConnectionId) -> Result<(), NetError> {
        (self.handler)(state, conn, &mut self.reader)
    }
}

impl<S> Clone for MessageHandlers<S> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<S> Default for MessageHandlers<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for MessageHandlers<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.table.keys().copied().collect();
        types.sort();
        f.debug_struct("MessageHandlers").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PingMessage, ReadyMessage};

    #[derive(Default)]
    struct Log {
        pings: Vec<(ConnectionId, f64)>,
        ready: u32,
    }

    fn handlers() -> MessageHandlers<Log> {
        let mut handlers = MessageHandlers::new();
        handlers.register::<PingMessage, _>(|log: &mut Log, conn, ping| {
            log.pings.push((conn, ping.client_time));
            Ok(())
        });
        handlers.register::<ReadyMessage, _>(|log: &mut Log, _conn, _msg| {
            log.ready += 1;
            Ok(())
        });
        handlers
    }

    #[test]
    fn test_dispatch_typed_message() {
        let handlers = handlers();
        let mut log = Log::default();
        let buffer = frame::pack(&PingMessage { client_time: 2.0 }).unwrap();
        let route = handlers.route(&buffer).unwrap();
        assert_eq!(route.message_type(), MessageType::PING);
        route.run(&mut log, ConnectionId(3)).unwrap();
        assert_eq!(log.pings, vec![(ConnectionId(3), 2.0)]);
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let handlers = handlers();
        let buffer = frame::pack_raw(MessageType(99), &[1, 2, 3]);
        assert!(matches!(
            handlers.route(&buffer),
            Err(NetError::UnknownMessage(MessageType(99)))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let handlers = handlers();
        let mut log = Log::default();
        let buffer = frame::pack_raw(MessageType::READY, &[0]);
        let route = handlers.route(&buffer).unwrap();
        assert!(matches!(route.run(&mut log, ConnectionId(1)), Err(NetError::Wire(_))));
        assert_eq!(log.ready, 0);
    }

    #[test]
    fn test_clone_shares_handlers() {
        let mut handlers = handlers();
        let copy = handlers.clone();
        assert!(handlers.unregister(MessageType::READY));
        assert!(copy.contains(MessageType::READY));
        assert!(!handlers.contains(MessageType::READY));
        assert_eq!(copy.len(), 2);
    }
}
