//! The receiving side.
//!
//! [`NetworkClient`] mirrors the server's entities into its own
//! [`ReplicationContext`]. Spawn messages resolve templates through the
//! [`TemplateRegistry`], `UpdateVars` applies deltas, and RPCs and sync
//! events run through the same [`RemoteCalls`] table the server uses for
//! commands.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use netsync_component::{ConnectionId, EntityOrigin, MethodHash, NetworkId, ReplicatedEntity};
use netsync_math::Pose;
use netsync_net::messages::{
    AddPlayerMessage, AuthorityMessage, CommandMessage, ErrorMessage, NotReadyMessage,
    ObjectDestroyMessage, ObjectHideMessage, OwnerMessage, PingMessage, PongMessage, ReadyMessage,
    RemoteCall, RemovePlayerMessage, RpcMessage, SpawnFinishedMessage, SpawnPrefabMessage,
    SpawnSceneObjectMessage, SyncEventMessage, UpdateVarsMessage,
};
use netsync_net::{
    Channel, Connection, MessageHandlers, NetError, NetworkMessage, Transport, TransportEvent,
};
use netsync_wire::{NetworkReader, NetworkWriter, WireCodec};
use tracing::{debug, info, warn};

use crate::config::ReplicationConfig;
use crate::context::ReplicationContext;
use crate::error::ReplicationError;
use crate::rpc::{CallKind, RemoteCalls};
use crate::templates::TemplateRegistry;

/// Weight of a new sample in the smoothed round-trip time.
const RTT_SMOOTHING: f64 = 2.0 / 11.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Round-trip time measured with ping/pong.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundTrip {
    /// Most recent sample.
    pub last: Option<Duration>,
    /// Exponential moving average of the samples.
    pub smoothed: Option<Duration>,
    /// Server clock from the latest pong, seconds.
    pub server_time: Option<f64>,
}

impl RoundTrip {
    fn record(&mut self, sample: f64, server_time: f64) {
        let sample = sample.max(0.0);
        let smoothed = match self.smoothed {
            Some(previous) => {
                let previous = previous.as_secs_f64();
                previous + RTT_SMOOTHING * (sample - previous)
            }
            None => sample,
        };
        self.last = Some(Duration::from_secs_f64(sample));
        self.smoothed = Some(Duration::from_secs_f64(smoothed));
        self.server_time = Some(server_time);
    }
}

/// A spawn message with its template reference unified.
struct Spawn {
    net_id: NetworkId,
    is_owner: bool,
    has_authority: bool,
    origin: EntityOrigin,
    pose: Pose,
    payload: Bytes,
}

impl From<SpawnPrefabMessage> for Spawn {
    fn from(message: SpawnPrefabMessage) -> Self {
        Self {
            net_id: message.net_id,
            is_owner: message.is_owner,
            has_authority: message.has_authority,
            origin: EntityOrigin::Prefab(message.asset_id),
            pose: message.pose,
            payload: message.payload,
        }
    }
}

impl From<SpawnSceneObjectMessage> for Spawn {
    fn from(message: SpawnSceneObjectMessage) -> Self {
        Self {
            net_id: message.net_id,
            is_owner: message.is_owner,
            has_authority: message.has_authority,
            origin: EntityOrigin::Scene(message.scene_id),
            pose: message.pose,
            payload: message.payload,
        }
    }
}

/// The client replication engine.
pub struct NetworkClient {
    config: ReplicationConfig,
    transport: Box<dyn Transport>,
    templates: Box<dyn TemplateRegistry>,
    calls: RemoteCalls,
    context: ReplicationContext,
    connection: Option<Connection<NetworkClient>>,
    pending: Option<ConnectionId>,
    handlers: MessageHandlers<NetworkClient>,
    state: ClientState,
    is_ready: bool,
    spawn_finished: bool,
    local_player: Option<NetworkId>,
    paused: bool,
    deferred: VecDeque<TransportEvent>,
    started: Instant,
    now: Instant,
    last_ping: Option<Instant>,
    rtt: RoundTrip,
    last_error: Option<String>,
}

impl NetworkClient {
    pub fn new(
        config: ReplicationConfig,
        transport: impl Transport + 'static,
        templates: impl TemplateRegistry + 'static,
        calls: RemoteCalls,
    ) -> Self {
        let now = Instant::now();
        let mut client = Self {
            config,
            transport: Box::new(transport),
            templates: Box::new(templates),
            calls,
            context: ReplicationContext::new(),
            connection: None,
            pending: None,
            handlers: MessageHandlers::new(),
            state: ClientState::Disconnected,
            is_ready: false,
            spawn_finished: false,
            local_player: None,
            paused: false,
            deferred: VecDeque::new(),
            started: now,
            now,
            last_ping: None,
            rtt: RoundTrip::default(),
            last_error: None,
        };
        client.register_builtin_handlers();
        client
    }

    fn register_builtin_handlers(&mut self) {
        let handlers = &mut self.handlers;
        handlers.register::<SpawnPrefabMessage, _>(|client: &mut Self, _, message| {
            client.handle_spawn(message.into());
            Ok(())
        });
        handlers.register::<SpawnSceneObjectMessage, _>(|client: &mut Self, _, message| {
            client.handle_spawn(message.into());
            Ok(())
        });
        handlers.register::<SpawnFinishedMessage, _>(|client: &mut Self, _, _| {
            client.spawn_finished = true;
            debug!(entities = client.context.len(), "initial spawn finished");
            Ok(())
        });
        handlers.register::<ObjectDestroyMessage, _>(|client: &mut Self, _, message| {
            client.remove_entity(message.net_id);
            Ok(())
        });
        handlers.register::<ObjectHideMessage, _>(|client: &mut Self, _, message| {
            client.remove_entity(message.net_id);
            Ok(())
        });
        handlers.register::<UpdateVarsMessage, _>(|client: &mut Self, _, message| {
            client.handle_update_vars(message.net_id, &message.payload);
            Ok(())
        });
        handlers.register::<RpcMessage, _>(|client: &mut Self, _, RpcMessage(call)| {
            client.invoke(CallKind::Rpc, &call);
            Ok(())
        });
        handlers.register::<SyncEventMessage, _>(|client: &mut Self, _, SyncEventMessage(call)| {
            client.invoke(CallKind::SyncEvent, &call);
            Ok(())
        });
        handlers.register::<OwnerMessage, _>(|client: &mut Self, _, message| {
            client.mark_local_player(message.net_id);
            Ok(())
        });
        handlers.register::<AuthorityMessage, _>(|client: &mut Self, _, message| {
            match client.context.get_mut(message.net_id) {
                Some(entity) => entity.set_has_authority(message.has_authority),
                None => debug!(net_id = %message.net_id, "authority change for unknown entity"),
            }
            Ok(())
        });
        handlers.register::<NotReadyMessage, _>(|client: &mut Self, _, _| {
            client.is_ready = false;
            client.spawn_finished = false;
            Ok(())
        });
        handlers.register::<PongMessage, _>(|client: &mut Self, _, pong| {
            let now = client.clock();
            client.rtt.record(now - pong.client_time, pong.server_time);
            Ok(())
        });
        handlers.register::<ErrorMessage, _>(|client: &mut Self, _, message| {
            warn!(reason = %message.reason, "server reported an error");
            client.last_error = Some(message.reason);
            Ok(())
        });
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start connecting to `address`. The connection is up once a
    /// `Connected` event has been handled by [`NetworkClient::update`].
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the server is unreachable.
    pub fn connect(&mut self, address: &str) -> Result<(), ReplicationError> {
        if self.state != ClientState::Disconnected {
            warn!(address, state = ?self.state, "connect while not disconnected; ignored");
            return Ok(());
        }
        let conn = self.transport.connect(address)?;
        self.pending = Some(conn);
        self.state = ClientState::Connecting;
        info!(address, connection = %conn, "connecting");
        Ok(())
    }

    /// Close the connection and tear down every mirrored entity.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection_id() {
            self.transport.disconnect(conn);
        }
        self.handle_disconnected();
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// `true` once the server has sent everything visible at ready time.
    #[must_use]
    pub fn spawn_finished(&self) -> bool {
        self.spawn_finished
    }

    /// Local id of the connection to the server.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(Connection::id).or(self.pending)
    }

    #[must_use]
    pub fn local_player(&self) -> Option<NetworkId> {
        self.local_player
    }

    #[must_use]
    pub fn rtt(&self) -> RoundTrip {
        self.rtt
    }

    /// Reason from the last `Error` message, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
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

    pub fn calls_mut(&mut self) -> &mut RemoteCalls {
        &mut self.calls
    }

    pub fn templates_mut(&mut self) -> &mut dyn TemplateRegistry {
        self.templates.as_mut()
    }

    /// Handle application message `M` from the server.
    pub fn register_handler<M, F>(&mut self, handler: F)
    where
        M: NetworkMessage + 'static,
        F: Fn(&mut NetworkClient, ConnectionId, M) -> Result<(), NetError> + 'static,
    {
        self.handlers.register::<M, F>(handler);
        if let Some(installed) = self.handlers.get(M::TYPE)
            && let Some(connection) = self.connection.as_mut()
        {
            connection
                .handlers_mut()
                .register_raw(M::TYPE, move |client, conn, reader| installed(client, conn, reader));
        }
    }

    // ── Requests ────────────────────────────────────────────────────────────

    /// Ask the server to start spawning entities for this client.
    ///
    /// # Errors
    ///
    /// Fails when not connected.
    pub fn ready(&mut self) -> Result<(), ReplicationError> {
        self.send(Channel::Reliable, &ReadyMessage)?;
        self.is_ready = true;
        Ok(())
    }

    /// Ask the server for a player object. Implies [`NetworkClient::ready`].
    ///
    /// # Errors
    ///
    /// Fails when not connected.
    pub fn add_player(&mut self) -> Result<(), ReplicationError> {
        self.send(Channel::Reliable, &AddPlayerMessage)?;
        self.is_ready = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails when not connected.
    pub fn remove_player(&mut self) -> Result<(), ReplicationError> {
        self.send(Channel::Reliable, &RemovePlayerMessage)?;
        Ok(())
    }

    /// Invoke command `method` on the server copy of `id`.
    ///
    /// The server decides whether this client may; a refused command is
    /// only visible in the server log.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entity, unencodable arguments or when not
    /// connected.
    pub fn send_command<A: WireCodec>(
        &mut self,
        id: NetworkId,
        component_index: usize,
        method: &str,
        args: &A,
    ) -> Result<(), ReplicationError> {
        let entity = self.context.get(id).ok_or(ReplicationError::UnknownEntity(id))?;
        if !entity.has_authority() {
            debug!(net_id = %id, method, "sending command without authority");
        }
        let mut writer = NetworkWriter::new();
        args.encode(&mut writer)?;
        let call = RemoteCall {
            net_id: id,
            component_index,
            method: MethodHash::of(method),
            payload: writer.into_bytes(),
        };
        self.send(Channel::Reliable, &CommandMessage(call))?;
        Ok(())
    }

    /// Send `message` to the server.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Rejected`] when not connected, or the encoding or
    /// transport error.
    pub fn send<M: NetworkMessage>(&mut self, channel: Channel, message: &M) -> Result<(), NetError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| NetError::rejected("not connected"))?;
        connection.send(self.transport.as_mut(), channel, message)
    }

    // ── Tick ────────────────────────────────────────────────────────────────

    /// Run one tick at `now`: handle inbound events, then ping if due.
    pub fn update(&mut self, now: Instant) {
        self.now = now;
        self.process_events();
        if self.is_connected()
            && self
                .last_ping
                .is_none_or(|sent| now.saturating_duration_since(sent) >= self.config.ping_interval)
        {
            self.last_ping = Some(now);
            let ping = PingMessage {
                client_time: self.clock(),
            };
            if let Err(err) = self.send(Channel::Unreliable, &ping) {
                warn!(error = %err, "ping failed");
            }
        }
    }

    /// Defer message handling; events keep being received and queued.
    pub fn pause_handling(&mut self) {
        self.paused = true;
    }

    pub fn resume_handling(&mut self) {
        self.paused = false;
    }

    #[must_use]
    pub fn deferred_events(&self) -> usize {
        self.deferred.len()
    }

    fn clock(&self) -> f64 {
        self.now.saturating_duration_since(self.started).as_secs_f64()
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
            TransportEvent::Disconnected(conn) => {
                if self.connection_id() == Some(conn) {
                    self.handle_disconnected();
                }
            }
        }
    }

    fn handle_connected(&mut self, conn: ConnectionId) {
        if self.pending != Some(conn) {
            warn!(connection = %conn, "unexpected connection event; ignored");
            return;
        }
        self.pending = None;
        self.connection = Some(Connection::new(conn, "server", self.handlers.clone()));
        self.state = ClientState::Connected;
        info!(connection = %conn, "connected");
    }

    fn handle_data(&mut self, conn: ConnectionId, buffer: &[u8]) {
        let now = self.now;
        let Some(connection) = self.connection.as_mut().filter(|c| c.id() == conn) else {
            warn!(connection = %conn, "data from unknown connection; dropped");
            return;
        };
        connection.touch(now);
        let route = match connection.handlers().route(buffer) {
            Ok(route) => route,
            Err(err) => {
                warn!(error = %err, "undeliverable message; rest of buffer discarded");
                return;
            }
        };
        let message_type = route.message_type();
        if let Err(err) = route.run(self, conn) {
            warn!(%message_type, error = %err, "message rejected");
        }
    }

    fn handle_disconnected(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        if let Some(connection) = self.connection.as_mut() {
            connection.close();
        }
        self.connection = None;
        self.pending = None;
        self.state = ClientState::Disconnected;
        self.is_ready = false;
        self.spawn_finished = false;
        self.local_player = None;
        self.last_ping = None;
        self.deferred.clear();
        for mut entity in self.context.drain() {
            entity.stop_client();
            if entity.origin().is_scene() {
                entity.reset();
                self.templates.store_scene_object(entity);
            }
        }
        info!("disconnected");
    }

    // ── Entity messages ─────────────────────────────────────────────────────

    fn handle_spawn(&mut self, spawn: Spawn) {
        let net_id = spawn.net_id;
        if let Err(err) = self.apply_spawn(spawn) {
            warn!(net_id = %net_id, error = %err, "spawn skipped");
        }
    }

    fn apply_spawn(&mut self, spawn: Spawn) -> Result<(), ReplicationError> {
        if let Some(entity) = self.context.get_mut(spawn.net_id) {
            entity.pose = spawn.pose;
            entity.deserialize(&mut NetworkReader::new(&spawn.payload), true)?;
            entity.set_has_authority(spawn.has_authority);
            debug!(net_id = %spawn.net_id, "spawn applied to existing entity");
            return Ok(());
        }

        let mut entity = match spawn.origin {
            EntityOrigin::Prefab(asset) => self.templates.instantiate(asset, &spawn.pose)?,
            EntityOrigin::Scene(scene) => {
                let mut entity = self
                    .templates
                    .take_scene_object(scene)
                    .ok_or(ReplicationError::UnknownScene(scene))?;
                entity.pose = spawn.pose;
                entity
            }
        };
        entity.activate(spawn.net_id);
        entity.apply_send_interval(self.config.send_interval);
        if let Err(err) = entity.deserialize(&mut NetworkReader::new(&spawn.payload), true) {
            if entity.origin().is_scene() {
                entity.reset();
                self.templates.store_scene_object(entity);
            }
            return Err(err.into());
        }
        if spawn.is_owner {
            entity.set_player_owner(self.connection_id());
        }
        entity.start_client();
        entity.set_has_authority(spawn.has_authority);
        self.context.insert(entity);
        if spawn.is_owner || self.local_player == Some(spawn.net_id) {
            self.mark_local_player(spawn.net_id);
        }
        debug!(net_id = %spawn.net_id, origin = ?spawn.origin, "spawned");
        Ok(())
    }

    fn mark_local_player(&mut self, id: NetworkId) {
        if let Some(previous) = self.local_player.filter(|previous| *previous != id)
            && let Some(entity) = self.context.get_mut(previous)
        {
            entity.set_local_player(false);
        }
        self.local_player = Some(id);
        if let Some(entity) = self.context.get_mut(id) {
            entity.set_local_player(true);
        }
    }

    /// Destroy or hide: either way the local copy goes away.
    fn remove_entity(&mut self, id: NetworkId) {
        let Some(mut entity) = self.context.remove(id) else {
            debug!(net_id = %id, "remove for unknown entity");
            return;
        };
        entity.stop_client();
        if self.local_player == Some(id) {
            self.local_player = None;
        }
        entity.reset();
        if entity.origin().is_scene() {
            self.templates.store_scene_object(entity);
        }
        debug!(net_id = %id, "removed");
    }

    fn handle_update_vars(&mut self, id: NetworkId, payload: &[u8]) {
        let Some(entity) = self.context.get_mut(id) else {
            warn!(net_id = %id, "state for unknown entity; dropped");
            return;
        };
        if let Err(err) = entity.deserialize(&mut NetworkReader::new(payload), false) {
            warn!(net_id = %id, error = %err, "malformed state update; dropped");
        }
    }

    fn invoke(&mut self, kind: CallKind, call: &RemoteCall) {
        let Some(entity) = self.context.get_mut(call.net_id) else {
            warn!(%kind, net_id = %call.net_id, "call for unknown entity; dropped");
            return;
        };
        if let Err(err) = self.calls.invoke(kind, entity, call, None) {
            warn!(%kind, net_id = %call.net_id, error = %err, "call rejected");
        }
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("state", &self.state)
            .field("ready", &self.is_ready)
            .field("entities", &self.context.len())
            .field("local_player", &self.local_player)
            .finish_non_exhaustive()
    }
}
