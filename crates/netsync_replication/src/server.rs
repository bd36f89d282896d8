//! The authoritative side.
//!
//! [`NetworkServer`] owns the transport, the connections and the
//! [`ReplicationContext`]. Everything happens inside [`NetworkServer::update`]:
//!
//! 1. Drain at most `max_events_per_tick` transport events (or buffer them
//!    while handling is paused) and dispatch each frame to its handler.
//! 2. For every entity with a delta due, serialize it once and send the
//!    same `UpdateVars` frame to each observer.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use netsync_component::{
    Authority, ConnectionId, EntityOrigin, NetworkId, ObserverCandidate, ReplicatedEntity,
};
use netsync_math::Pose;
use netsync_net::messages::{
    AddPlayerMessage, AuthorityMessage, CommandMessage, ErrorMessage, NotReadyMessage,
    ObjectDestroyMessage, ObjectHideMessage, OwnerMessage, PingMessage, PongMessage, ReadyMessage,
    RemoteCall, RemovePlayerMessage, RpcMessage, SpawnFinishedMessage, SpawnPrefabMessage,
    SpawnSceneObjectMessage, SyncEventMessage, UpdateVarsMessage,
};
use netsync_net::{
    Channel, Connection, MessageHandlers, NetError, NetworkMessage, Transport, TransportEvent, frame,
};
use netsync_wire::{NetworkWriter, WireCodec, WireError};
use tracing::{debug, error, info, warn};

use crate::config::ReplicationConfig;
use crate::context::ReplicationContext;
use crate::error::ReplicationError;
use crate::observers::{compute_observers, diff_observers};
use crate::rpc::{CallKind, RemoteCalls};
use crate::templates::TemplateRegistry;

/// The server replication engine.
pub struct NetworkServer {
    config: ReplicationConfig,
    transport: Box<dyn Transport>,
    templates: Box<dyn TemplateRegistry>,
    calls: RemoteCalls,
    context: ReplicationContext,
    connections: BTreeMap<ConnectionId, Connection<NetworkServer>>,
    handlers: MessageHandlers<NetworkServer>,
    active: bool,
    paused: bool,
    deferred: VecDeque<TransportEvent>,
    started: Instant,
    now: Instant,
}

impl NetworkServer {
    /// Create an inactive server. Built-in message handlers are installed
    /// here; call [`NetworkServer::listen`] to start accepting connections.
    pub fn new(
        config: ReplicationConfig,
        transport: impl Transport + 'static,
        templates: impl TemplateRegistry + 'static,
        calls: RemoteCalls,
    ) -> Self {
        let now = Instant::now();
        let mut server = Self {
            config,
            transport: Box::new(transport),
            templates: Box::new(templates),
            calls,
            context: ReplicationContext::new(),
            connections: BTreeMap::new(),
            handlers: MessageHandlers::new(),
            active: false,
            paused: false,
            deferred: VecDeque::new(),
            started: now,
            now,
        };
        server.register_builtin_handlers();
        server
    }

    fn register_builtin_handlers(&mut self) {
        let handlers = &mut self.handlers;
        handlers.register::<ReadyMessage, _>(|server: &mut Self, conn, _| server.set_ready(conn));
        handlers.register::<AddPlayerMessage, _>(|server: &mut Self, conn, _| {
            server.handle_add_player(conn);
            Ok(())
        });
        handlers.register::<RemovePlayerMessage, _>(|server: &mut Self, conn, _| {
            server.handle_remove_player(conn);
            Ok(())
        });
        handlers.register::<CommandMessage, _>(|server: &mut Self, conn, CommandMessage(call)| {
            server.handle_command(conn, &call);
            Ok(())
        });
        handlers.register::<PingMessage, _>(|server: &mut Self, conn, ping| {
            let pong = PongMessage {
                client_time: ping.client_time,
                server_time: server.now.saturating_duration_since(server.started).as_secs_f64(),
            };
            server.send_to(conn, Channel::Unreliable, &pong)?;
            Ok(())
        });
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start listening on the configured address.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the address cannot be bound.
    pub fn listen(&mut self) -> Result<(), ReplicationError> {
        self.transport
            .listen(&self.config.listen_address, self.config.max_connections)?;
        self.active = true;
        info!(address = %self.config.listen_address, "server listening");
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Disconnect everyone, tear down every entity and stop listening.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        let ids: Vec<_> = self.connections.keys().copied().collect();
        for conn in ids {
            self.disconnect(conn);
        }
        for mut entity in self.context.drain() {
            entity.stop_server();
            if entity.origin().is_scene() {
                entity.reset();
                self.templates.store_scene_object(entity);
            }
        }
        self.transport.shutdown();
        self.deferred.clear();
        self.active = false;
        info!("server stopped");
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Handle application message `M` on every current and future connection.
    pub fn register_handler<M, F>(&mut self, handler: F)
    where
        M: NetworkMessage + 'static,
        F: Fn(&mut NetworkServer, ConnectionId, M) -> Result<(), NetError> + 'static,
    {
        self.handlers.register::<M, F>(handler);
        if let Some(installed) = self.handlers.get(M::TYPE) {
            for connection in self.connections.values_mut() {
                let handler = installed.clone();
                connection
                    .handlers_mut()
                    .register_raw(M::TYPE, move |server, conn, reader| handler(server, conn, reader));
            }
        }
    }

    /// Remote call table used to validate and run commands.
    pub fn calls_mut(&mut self) -> &mut RemoteCalls {
        &mut self.calls
    }

    pub fn templates_mut(&mut self) -> &mut dyn TemplateRegistry {
        self.templates.as_mut()
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &ReplicationContext {
        &self.context
    }

    #[must_use]
    pub fn entity(&self, id: NetworkId) -> Option<&ReplicatedEntity> {
        self.context.get(id)
    }

    pub fn entity_mut(&mut self, id: NetworkId) -> Option<&mut ReplicatedEntity> {
        self.context.get_mut(id)
    }

    #[must_use]
    pub fn connection(&self, conn: ConnectionId) -> Option<&Connection<NetworkServer>> {
        self.connections.get(&conn)
    }

    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    // ── Tick ────────────────────────────────────────────────────────────────

    /// Run one tick at `now`.
    pub fn update(&mut self, now: Instant) {
        self.now = now;
        self.process_events();
        self.broadcast_deltas(now);
    }

    /// Defer message handling until [`NetworkServer::resume_handling`].
    /// Events keep being received and are queued in order.
    pub fn pause_handling(&mut self) {
        self.paused = true;
    }

    pub fn resume_handling(&mut self) {
        self.paused = false;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Events received while paused and not handled yet.
    #[must_use]
    pub fn deferred_events(&self) -> usize {
        self.deferred.len()
    }

    fn process_events(&mut self) {
        let mut budget = self.config.max_events_per_tick;
        while budget > 0 && !self.paused {
            let Some(event) = self.deferred.pop_front() else {
                break;
            };
            self.handle_event(event);
            budget -= 1;
        }
        while budget > 0 {
            let Some(event) = self.transport.poll_event() else {
                break;
            };
            if self.paused {
                self.deferred.push_back(event);
            } else {
                self.handle_event(event);
            }
            budget -= 1;
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(conn) => self.handle_connected(conn),
            TransportEvent::Data(conn, _channel, frame) => self.handle_data(conn, &frame),
            TransportEvent::Disconnected(conn) => self.handle_disconnected(conn),
        }
    }

    fn handle_connected(&mut self, conn: ConnectionId) {
        if !self.active {
            warn!(connection = %conn, "connection while inactive; closing");
            self.transport.disconnect(conn);
            return;
        }
        let connection = Connection::new(conn, self.config.listen_address.clone(), self.handlers.clone());
        self.connections.insert(conn, connection);
        info!(connection = %conn, "client connected");
    }

    fn handle_data(&mut self, conn: ConnectionId, buffer: &[u8]) {
        let now = self.now;
        let Some(connection) = self.connections.get_mut(&conn) else {
            warn!(connection = %conn, "data from unknown connection; dropped");
            return;
        };
        connection.touch(now);
        let route = match connection.handlers().route(buffer) {
            Ok(route) => route,
            Err(err) => {
                warn!(connection = %conn, error = %err, "undeliverable message; rest of buffer discarded");
                return;
            }
        };
        let message_type = route.message_type();
        if let Err(err) = route.run(self, conn) {
            warn!(connection = %conn, %message_type, error = %err, "message rejected");
        }
    }

    /// Close a connection and release everything it held. Safe to call
    /// more than once.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.transport.disconnect(conn);
        self.handle_disconnected(conn);
    }

    fn handle_disconnected(&mut self, conn: ConnectionId) {
        let Some(mut connection) = self.connections.remove(&conn) else {
            return;
        };
        connection.close();
        connection.set_ready(false);

        for id in connection.take_observing() {
            if let Some(entity) = self.context.get_mut(id) {
                entity.remove_observer(conn);
            }
        }

        let player = connection.player();
        for id in connection.take_owned() {
            if Some(id) == player && self.config.destroy_player_on_disconnect {
                continue;
            }
            self.release_ownership(id, conn);
        }
        if let Some(player) = player {
            if self.config.destroy_player_on_disconnect {
                if let Err(err) = self.destroy(player) {
                    warn!(connection = %conn, net_id = %player, error = %err, "failed to destroy player");
                }
            } else {
                self.release_ownership(player, conn);
            }
        }
        info!(connection = %conn, "client disconnected");
    }

    /// Drop every claim `conn` has on entity `id`. Authority granted to
    /// `conn` falls back to the player owner, who is told.
    fn release_ownership(&mut self, id: NetworkId, conn: ConnectionId) {
        let Some(entity) = self.context.get_mut(id) else {
            return;
        };
        if entity.player_owner() == Some(conn) {
            entity.set_player_owner(None);
        }
        if entity.authority().holder() != Some(conn) {
            return;
        }
        let Some(owner) = entity.player_owner() else {
            entity.set_authority(Authority::Server);
            return;
        };
        entity.set_authority(Authority::Player(owner));
        if let Some(connection) = self.connections.get_mut(&owner) {
            connection.add_owned(id);
        }
        self.notify_authority(id, owner, true);
    }

    // ── Readiness ───────────────────────────────────────────────────────────

    /// Mark `conn` ready, spawn everything it may see and finish with
    /// `SpawnFinished`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Rejected`] for an unknown connection.
    pub fn set_ready(&mut self, conn: ConnectionId) -> Result<(), NetError> {
        let connection = self
            .connections
            .get_mut(&conn)
            .ok_or_else(|| NetError::rejected(format!("unknown connection {conn}")))?;
        if connection.is_ready() {
            debug!(connection = %conn, "already ready");
            return Ok(());
        }
        connection.set_ready(true);

        let candidate = self.candidate(conn);
        let visible: Vec<NetworkId> = self
            .context
            .iter()
            .filter(|entity| !entity.is_observed_by(conn))
            .filter(|entity| entity.player_owner() == Some(conn) || entity.check_observer(&candidate))
            .map(ReplicatedEntity::id)
            .collect();
        for id in &visible {
            self.add_observer(*id, conn);
        }
        self.send_to(conn, Channel::Reliable, &SpawnFinishedMessage)?;
        info!(connection = %conn, spawned = visible.len(), "client ready");
        Ok(())
    }

    /// Stop sending spawn and state traffic to `conn`. Everything it
    /// observed is hidden.
    pub fn set_not_ready(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        connection.set_ready(false);
        let observed = connection.take_observing();
        for id in observed {
            if let Some(entity) = self.context.get_mut(id) {
                entity.remove_observer(conn);
            }
            self.send_logged(conn, &ObjectHideMessage { net_id: id });
        }
        self.send_logged(conn, &NotReadyMessage);
    }

    fn candidate(&self, conn: ConnectionId) -> ObserverCandidate {
        let player_pose = self
            .connections
            .get(&conn)
            .and_then(Connection::player)
            .and_then(|player| self.context.get(player))
            .map(|entity| entity.pose);
        ObserverCandidate {
            connection: conn,
            player_pose,
        }
    }

    fn candidates(&self) -> Vec<ObserverCandidate> {
        self.connections
            .values()
            .filter(|connection| connection.is_ready())
            .map(|connection| self.candidate(connection.id()))
            .collect()
    }

    // ── Spawn / destroy ─────────────────────────────────────────────────────

    /// Replicate a pending entity and spawn it on every observer.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::AlreadySpawned`] if the entity already has
    /// an id; use [`NetworkServer::respawn`] to re-broadcast an active one.
    pub fn spawn(&mut self, entity: ReplicatedEntity) -> Result<NetworkId, ReplicationError> {
        self.spawn_inner(entity, None)
    }

    /// [`NetworkServer::spawn`] with `owner` as the entity's player owner.
    /// Ownership implies authority.
    ///
    /// # Errors
    ///
    /// See [`NetworkServer::spawn`]; also fails for an unknown connection.
    pub fn spawn_owned(&mut self, entity: ReplicatedEntity, owner: ConnectionId) -> Result<NetworkId, ReplicationError> {
        if !self.connections.contains_key(&owner) {
            return Err(ReplicationError::UnknownConnection(owner));
        }
        self.spawn_inner(entity, Some(owner))
    }

    fn spawn_inner(&mut self, mut entity: ReplicatedEntity, owner: Option<ConnectionId>) -> Result<NetworkId, ReplicationError> {
        if !self.active {
            return Err(ReplicationError::NotActive);
        }
        if entity.id().is_valid() {
            return Err(ReplicationError::AlreadySpawned(entity.id()));
        }
        let id = self.context.allocate_id();
        entity.activate(id);
        entity.apply_send_interval(self.config.send_interval);
        if let Some(owner) = owner {
            entity.set_player_owner(Some(owner));
            entity.set_authority(Authority::Player(owner));
            if let Some(connection) = self.connections.get_mut(&owner) {
                connection.add_owned(id);
            }
        }
        entity.start_server();
        debug!(net_id = %id, origin = ?entity.origin(), "spawned");
        self.context.insert(entity);
        self.rebuild_observers_inner(id, true)?;
        Ok(id)
    }

    /// Re-broadcast an active entity's spawn to every current observer.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::UnknownEntity`] if `id` is not active.
    pub fn respawn(&mut self, id: NetworkId) -> Result<(), ReplicationError> {
        self.rebuild_observers_inner(id, true)
    }

    /// Activate every dormant scene object.
    ///
    /// # Errors
    ///
    /// Stops at the first spawn error.
    pub fn spawn_scene_objects(&mut self) -> Result<Vec<NetworkId>, ReplicationError> {
        let mut spawned = Vec::new();
        for scene in self.templates.dormant_scene_ids() {
            if let Some(entity) = self.templates.take_scene_object(scene) {
                spawned.push(self.spawn(entity)?);
            }
        }
        Ok(spawned)
    }

    /// Destroy an entity on every observer and remove it.
    ///
    /// Scene objects are reset and returned to the dormant pool; prefab
    /// instances are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::UnknownEntity`] if `id` is not active.
    pub fn destroy(&mut self, id: NetworkId) -> Result<(), ReplicationError> {
        let mut entity = self
            .context
            .remove(id)
            .ok_or(ReplicationError::UnknownEntity(id))?;

        for conn in entity.take_observers() {
            if let Some(connection) = self.connections.get_mut(&conn) {
                connection.remove_observing(id);
            }
            self.send_logged(conn, &ObjectDestroyMessage { net_id: id });
        }
        for holder in [entity.player_owner(), entity.authority().holder()].into_iter().flatten() {
            if let Some(connection) = self.connections.get_mut(&holder) {
                connection.remove_owned(id);
                if connection.player() == Some(id) {
                    connection.set_player(None);
                }
            }
        }

        entity.stop_server();
        entity.reset();
        debug!(net_id = %id, "destroyed");
        if entity.origin().is_scene() {
            self.templates.store_scene_object(entity);
        }
        Ok(())
    }

    // ── Observers ───────────────────────────────────────────────────────────

    /// Recompute who observes `id` and send the resulting spawn and hide
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::UnknownEntity`] if `id` is not active.
    pub fn rebuild_observers(&mut self, id: NetworkId) -> Result<(), ReplicationError> {
        self.rebuild_observers_inner(id, false)
    }

    /// [`NetworkServer::rebuild_observers`] for every entity.
    pub fn rebuild_all_observers(&mut self) {
        for id in self.context.ids() {
            if let Err(err) = self.rebuild_observers_inner(id, false) {
                warn!(net_id = %id, error = %err, "observer rebuild failed");
            }
        }
    }

    fn rebuild_observers_inner(&mut self, id: NetworkId, initial: bool) -> Result<(), ReplicationError> {
        let candidates = self.candidates();
        let entity = self.context.get(id).ok_or(ReplicationError::UnknownEntity(id))?;
        let new = compute_observers(entity, &candidates, initial);
        let diff = diff_observers(entity.observers(), &new, initial);
        if diff.is_empty() {
            return Ok(());
        }

        let payload = initial_payload(entity);
        let spawns = diff
            .to_spawn
            .iter()
            .map(|&conn| Ok((conn, spawn_frame(entity, &payload, conn)?)))
            .collect::<Result<Vec<_>, WireError>>()?;

        if let Some(entity) = self.context.get_mut(id) {
            for &conn in &diff.to_spawn {
                entity.add_observer(conn);
            }
            for conn in &diff.to_hide {
                entity.remove_observer(*conn);
            }
        }
        for (conn, frame) in spawns {
            if let Some(connection) = self.connections.get_mut(&conn) {
                connection.add_observing(id);
            }
            self.send_frame_logged(conn, Channel::Reliable, frame);
        }
        for conn in diff.to_hide {
            if let Some(connection) = self.connections.get_mut(&conn) {
                connection.remove_observing(id);
            }
            self.send_logged(conn, &ObjectHideMessage { net_id: id });
        }
        Ok(())
    }

    fn add_observer(&mut self, id: NetworkId, conn: ConnectionId) {
        let Some(entity) = self.context.get_mut(id) else {
            return;
        };
        entity.add_observer(conn);
        let entity = &*entity;
        let payload = initial_payload(entity);
        match spawn_frame(entity, &payload, conn) {
            Ok(frame) => {
                if let Some(connection) = self.connections.get_mut(&conn) {
                    connection.add_observing(id);
                }
                self.send_frame_logged(conn, Channel::Reliable, frame);
            }
            Err(err) => error!(net_id = %id, error = %err, "failed to encode spawn"),
        }
    }

    // ── Authority ───────────────────────────────────────────────────────────

    /// Give `conn` authority over `id`.
    ///
    /// Authority implied by player ownership is revoked (and its holder
    /// notified) first. Explicit authority held by another connection must
    /// be revoked by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::AuthorityHeld`] if another connection
    /// holds explicit authority, or an unknown entity/connection error.
    pub fn assign_authority(&mut self, id: NetworkId, conn: ConnectionId) -> Result<(), ReplicationError> {
        if !self.connections.contains_key(&conn) {
            return Err(ReplicationError::UnknownConnection(conn));
        }
        let entity = self.context.get_mut(id).ok_or(ReplicationError::UnknownEntity(id))?;
        let previous = match entity.authority() {
            Authority::Granted(holder) if holder == conn => return Ok(()),
            Authority::Granted(holder) => {
                return Err(ReplicationError::AuthorityHeld { net_id: id, holder });
            }
            Authority::Player(holder) if holder == conn => None,
            Authority::Player(holder) => Some(holder),
            Authority::Server => None,
        };
        entity.set_authority(Authority::Granted(conn));

        if let Some(previous) = previous {
            if let Some(connection) = self.connections.get_mut(&previous) {
                connection.remove_owned(id);
            }
            self.notify_authority(id, previous, false);
        }
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.add_owned(id);
        }
        self.notify_authority(id, conn, true);
        info!(net_id = %id, connection = %conn, "authority assigned");
        Ok(())
    }

    /// Take client authority away from `id`.
    ///
    /// Revoking an explicit grant hands authority back to the player owner,
    /// if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::NoAuthority`] if only the server holds it.
    pub fn revoke_authority(&mut self, id: NetworkId) -> Result<(), ReplicationError> {
        let entity = self.context.get_mut(id).ok_or(ReplicationError::UnknownEntity(id))?;
        let (revoked, restored) = match entity.authority() {
            Authority::Server => return Err(ReplicationError::NoAuthority(id)),
            Authority::Player(holder) => (holder, None),
            Authority::Granted(holder) => (holder, entity.player_owner().filter(|owner| *owner != holder)),
        };
        entity.set_authority(match restored {
            Some(owner) => Authority::Player(owner),
            None => Authority::Server,
        });

        if let Some(connection) = self.connections.get_mut(&revoked) {
            connection.remove_owned(id);
        }
        self.notify_authority(id, revoked, false);
        if let Some(owner) = restored {
            if let Some(connection) = self.connections.get_mut(&owner) {
                connection.add_owned(id);
            }
            self.notify_authority(id, owner, true);
        }
        info!(net_id = %id, connection = %revoked, "authority revoked");
        Ok(())
    }

    /// Tell `conn` about an authority change, if it can see the entity.
    /// Otherwise its next spawn message carries the flag.
    fn notify_authority(&mut self, id: NetworkId, conn: ConnectionId, has_authority: bool) {
        let observing = self
            .connections
            .get(&conn)
            .is_some_and(|connection| connection.observing().contains(&id));
        if observing {
            self.send_logged(conn, &AuthorityMessage { net_id: id, has_authority });
        }
    }

    // ── Players ─────────────────────────────────────────────────────────────

    fn handle_add_player(&mut self, conn: ConnectionId) {
        if let Err(err) = self.add_player(conn) {
            warn!(connection = %conn, error = %err, "add player refused");
            self.send_logged(conn, &ErrorMessage { reason: err.to_string() });
        }
    }

    /// Spawn the configured player template for `conn`.
    ///
    /// The connection is made ready first if it is not yet.
    ///
    /// # Errors
    ///
    /// Fails if there is no player template, the connection already has a
    /// player, or the template cannot be instantiated.
    pub fn add_player(&mut self, conn: ConnectionId) -> Result<NetworkId, ReplicationError> {
        let connection = self
            .connections
            .get(&conn)
            .ok_or(ReplicationError::UnknownConnection(conn))?;
        if let Some(player) = connection.player() {
            return Err(ReplicationError::PlayerExists { connection: conn, player });
        }
        let asset = self.config.player_asset.ok_or(ReplicationError::NoPlayerTemplate)?;
        if !connection.is_ready() {
            self.set_ready(conn)?;
        }
        let entity = self.templates.instantiate(asset, &Pose::IDENTITY)?;
        let id = self.spawn_owned(entity, conn)?;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.set_player(Some(id));
        }
        self.send_to(conn, Channel::Reliable, &OwnerMessage { net_id: id })?;
        info!(connection = %conn, net_id = %id, "player added");
        Ok(id)
    }

    fn handle_remove_player(&mut self, conn: ConnectionId) {
        let player = self.connections.get(&conn).and_then(Connection::player);
        match player {
            Some(id) => {
                if let Err(err) = self.destroy(id) {
                    warn!(connection = %conn, net_id = %id, error = %err, "remove player failed");
                }
            }
            None => debug!(connection = %conn, "remove player without a player"),
        }
    }

    // ── Remote calls ────────────────────────────────────────────────────────

    fn handle_command(&mut self, conn: ConnectionId, call: &RemoteCall) {
        let Some(entity) = self.context.get_mut(call.net_id) else {
            warn!(connection = %conn, net_id = %call.net_id, "command for unknown entity; dropped");
            return;
        };
        if let Err(err) = self.calls.invoke(CallKind::Command, entity, call, Some(conn)) {
            warn!(connection = %conn, net_id = %call.net_id, error = %err, "command rejected");
        }
    }

    /// Invoke `method` on every observer of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown entity or unencodable arguments.
    pub fn send_rpc<A: WireCodec>(
        &mut self,
        id: NetworkId,
        component_index: usize,
        method: &str,
        args: &A,
    ) -> Result<(), ReplicationError> {
        let call = self.build_call(id, component_index, method, args)?;
        let frame = frame::pack(&RpcMessage(call))?;
        self.broadcast_frame(id, frame)
    }

    /// Invoke `method` on one observer of `id` only.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown entity or connection, or if the
    /// connection does not observe the entity.
    pub fn send_target_rpc<A: WireCodec>(
        &mut self,
        id: NetworkId,
        conn: ConnectionId,
        component_index: usize,
        method: &str,
        args: &A,
    ) -> Result<(), ReplicationError> {
        let call = self.build_call(id, component_index, method, args)?;
        let connection = self
            .connections
            .get(&conn)
            .ok_or(ReplicationError::UnknownConnection(conn))?;
        if !connection.observing().contains(&id) {
            return Err(NetError::rejected(format!("{conn} does not observe {id}")).into());
        }
        self.send_to(conn, Channel::Reliable, &RpcMessage(call))?;
        Ok(())
    }

    /// Raise a sync event on every observer of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown entity or unencodable arguments.
    pub fn send_sync_event<A: WireCodec>(
        &mut self,
        id: NetworkId,
        component_index: usize,
        event: &str,
        args: &A,
    ) -> Result<(), ReplicationError> {
        let call = self.build_call(id, component_index, event, args)?;
        let frame = frame::pack(&SyncEventMessage(call))?;
        self.broadcast_frame(id, frame)
    }

    fn build_call<A: WireCodec>(
        &self,
        id: NetworkId,
        component_index: usize,
        method: &str,
        args: &A,
    ) -> Result<RemoteCall, ReplicationError> {
        if !self.context.contains(id) {
            return Err(ReplicationError::UnknownEntity(id));
        }
        let mut writer = NetworkWriter::new();
        args.encode(&mut writer)?;
        Ok(RemoteCall {
            net_id: id,
            component_index,
            method: netsync_component::MethodHash::of(method),
            payload: writer.into_bytes(),
        })
    }

    fn broadcast_frame(&mut self, id: NetworkId, frame: Bytes) -> Result<(), ReplicationError> {
        let observers: Vec<_> = self
            .context
            .get(id)
            .ok_or(ReplicationError::UnknownEntity(id))?
            .observers()
            .iter()
            .copied()
            .collect();
        for conn in observers {
            self.send_frame_logged(conn, Channel::Reliable, frame.clone());
        }
        Ok(())
    }

    // ── Sending ─────────────────────────────────────────────────────────────

    /// Send `message` to one connection.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown connection or a transport failure.
    pub fn send_to<M: NetworkMessage>(&mut self, conn: ConnectionId, channel: Channel, message: &M) -> Result<(), NetError> {
        let connection = self
            .connections
            .get(&conn)
            .ok_or_else(|| NetError::rejected(format!("unknown connection {conn}")))?;
        connection.send(self.transport.as_mut(), channel, message)
    }

    /// Send `message` to every ready connection.
    ///
    /// # Errors
    ///
    /// Returns the encoding error; per-connection send failures are logged.
    pub fn broadcast<M: NetworkMessage>(&mut self, channel: Channel, message: &M) -> Result<(), NetError> {
        let frame = frame::pack(message)?;
        let ready: Vec<_> = self
            .connections
            .values()
            .filter(|connection| connection.is_ready())
            .map(Connection::id)
            .collect();
        for conn in ready {
            self.send_frame_logged(conn, channel, frame.clone());
        }
        Ok(())
    }

    fn send_logged<M: NetworkMessage>(&mut self, conn: ConnectionId, message: &M) {
        match frame::pack(message) {
            Ok(frame) => self.send_frame_logged(conn, Channel::Reliable, frame),
            Err(err) => error!(connection = %conn, message_type = %M::TYPE, error = %err, "failed to encode message"),
        }
    }

    fn send_frame_logged(&mut self, conn: ConnectionId, channel: Channel, frame: Bytes) {
        let Some(connection) = self.connections.get(&conn) else {
            debug!(connection = %conn, "send to closed connection skipped");
            return;
        };
        if let Err(err) = connection.send_frame(self.transport.as_mut(), channel, frame) {
            warn!(connection = %conn, error = %err, "send failed");
        }
    }

    // ── State sync ──────────────────────────────────────────────────────────

    /// Send one `UpdateVars` per entity with a delta due at `now`.
    ///
    /// Entities without observers are still cleared so their changes do not
    /// pile up.
    pub fn broadcast_deltas(&mut self, now: Instant) {
        let mut outgoing: Vec<(Vec<ConnectionId>, Bytes)> = Vec::new();
        let mut writer = NetworkWriter::new();
        for entity in self.context.iter_mut() {
            if !entity.is_dirty(now) {
                continue;
            }
            writer.clear();
            entity.serialize_delta(&mut writer, now);
            if entity.observers().is_empty() {
                continue;
            }
            let message = UpdateVarsMessage {
                net_id: entity.id(),
                payload: Bytes::copy_from_slice(writer.as_slice()),
            };
            match frame::pack(&message) {
                Ok(frame) => outgoing.push((entity.observers().iter().copied().collect(), frame)),
                Err(err) => error!(net_id = %entity.id(), error = %err, "failed to encode delta"),
            }
        }
        for (observers, frame) in outgoing {
            for conn in observers {
                self.send_frame_logged(conn, Channel::Reliable, frame.clone());
            }
        }
    }
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("active", &self.active)
            .field("entities", &self.context.len())
            .field("connections", &self.connections.len())
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

fn initial_payload(entity: &ReplicatedEntity) -> Bytes {
    let mut writer = NetworkWriter::new();
    entity.serialize_initial(&mut writer);
    writer.into_bytes()
}

/// The spawn frame for `entity` as seen by `conn`.
fn spawn_frame(entity: &ReplicatedEntity, payload: &Bytes, conn: ConnectionId) -> Result<Bytes, WireError> {
    let is_owner = entity.player_owner() == Some(conn);
    let has_authority = entity.authority().holder() == Some(conn);
    match entity.origin() {
        EntityOrigin::Prefab(asset_id) => frame::pack(&SpawnPrefabMessage {
            net_id: entity.id(),
            is_owner,
            has_authority,
            asset_id,
            pose: entity.pose,
            payload: payload.clone(),
        }),
        EntityOrigin::Scene(scene_id) => frame::pack(&SpawnSceneObjectMessage {
            net_id: entity.id(),
            is_owner,
            has_authority,
            scene_id,
            pose: entity.pose,
            payload: payload.clone(),
        }),
    }
}
