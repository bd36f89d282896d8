//! The demo world: a server with crates and a chest, and clients that join,
//! ask for players, steer them and trade a few calls.

use std::time::{Duration, Instant};

use anyhow::Result;
use components::prefabs::{self, PLAYER_ASSET, chest_object, player};
use components::{Health, Inventory, Item, Name, Velocity};
use netsync_component::NetworkId;
use netsync_math::Vec3;
use netsync_net::LoopbackHub;
use netsync_replication::{NetworkClient, NetworkServer, ReplicationConfig};
use netsync_wire::MsgPack;
use tracing::{debug, info, warn};

use crate::tick::Step;

const CRATE_POSITIONS: [f32; 3] = [-30.0, 0.0, 30.0];
const STEER_EVERY: u64 = 15;
const REBUILD_EVERY: u64 = 30;
const DAMAGE_EVERY: u64 = 45;
const REPORT_EVERY: u64 = 100;
const SPEED: f32 = 4.0;

pub struct Simulation {
    server: NetworkServer,
    clients: Vec<NetworkClient>,
    crates: Vec<NetworkId>,
    chest: Option<NetworkId>,
    players_requested: bool,
}

impl Simulation {
    /// Start the server, place the scene and connect `clients` clients.
    ///
    /// # Errors
    ///
    /// Fails if the server cannot listen or a client cannot connect.
    pub fn new(config: ReplicationConfig, clients: usize) -> Result<Self> {
        let hub = LoopbackHub::new();
        let config = config.with_player_asset(PLAYER_ASSET);

        let mut server = NetworkServer::new(
            config.clone(),
            hub.transport(),
            prefabs::templates()?,
            prefabs::remote_calls(),
        );
        server.listen()?;

        let chest = server.spawn_scene_objects()?.into_iter().next();
        let templates = prefabs::templates()?;
        let mut crates = Vec::with_capacity(CRATE_POSITIONS.len());
        for x in CRATE_POSITIONS {
            let entity = prefabs::crate_at(&templates, Vec3::new(x, 0.0, 0.0))?;
            crates.push(server.spawn(entity)?);
        }
        info!(crates = crates.len(), chest = ?chest, "scene spawned");

        let mut peers = Vec::with_capacity(clients);
        for _ in 0..clients {
            let mut client = NetworkClient::new(
                config.clone(),
                hub.transport(),
                prefabs::templates()?,
                prefabs::remote_calls(),
            );
            client.connect(&config.listen_address)?;
            peers.push(client);
        }

        Ok(Self {
            server,
            clients: peers,
            crates,
            chest,
            players_requested: false,
        })
    }

    #[must_use]
    pub fn server(&self) -> &NetworkServer {
        &self.server
    }

    #[must_use]
    pub fn clients(&self) -> &[NetworkClient] {
        &self.clients
    }

    fn request_players(&mut self) {
        if self.players_requested || !self.clients.iter().all(NetworkClient::is_connected) {
            return;
        }
        for (index, client) in self.clients.iter_mut().enumerate() {
            if let Err(err) = client.add_player() {
                warn!(client = index, error = %err, "add player failed");
            }
        }
        self.players_requested = true;
    }

    /// Each client turns its player a quarter circle every few ticks.
    fn steer(&mut self, tick_id: u64) {
        let turn = (tick_id / STEER_EVERY) as f32 * std::f32::consts::FRAC_PI_2;
        for (index, client) in self.clients.iter_mut().enumerate() {
            let Some(id) = client.local_player() else {
                continue;
            };
            let angle = turn + index as f32;
            let velocity = (angle.cos() * SPEED, 0.0, angle.sin() * SPEED);
            if let Err(err) = client.send_command(id, player::VELOCITY, "set_velocity", &velocity) {
                warn!(client = index, error = %err, "steer failed");
            }
        }
    }

    /// Move every player by its replicated velocity.
    fn integrate(&mut self, dt: Duration) {
        let players: Vec<NetworkId> = self
            .server
            .connection_ids()
            .into_iter()
            .filter_map(|conn| self.server.connection(conn)?.player())
            .collect();
        for id in players {
            let Some(entity) = self.server.entity_mut(id) else {
                continue;
            };
            let Some(linear) = entity.get::<Velocity>().map(Velocity::linear) else {
                continue;
            };
            entity.pose.position += linear * dt.as_secs_f32();
        }
    }

    fn damage_first_player(&mut self) {
        let Some(id) = self
            .server
            .connection_ids()
            .into_iter()
            .find_map(|conn| self.server.connection(conn)?.player())
        else {
            return;
        };
        if let Some(health) = self.server.entity_mut(id).and_then(|e| e.get_mut::<Health>()) {
            health.damage(10.0);
            debug!(net_id = %id, health = health.current(), "player damaged");
        }
        if let Err(err) = self.server.send_rpc(id, player::HEALTH, "on_damaged", &10.0f32) {
            warn!(net_id = %id, error = %err, "damage rpc failed");
        }
    }

    fn scripted(&mut self, tick_id: u64) {
        match tick_id {
            60 => {
                let Some(client) = self.clients.first_mut() else {
                    return;
                };
                if let Some(id) = client.local_player() {
                    let item = MsgPack(Item::new("apple", 2));
                    if let Err(err) = client.send_command(id, player::INVENTORY, "pick_up", &item) {
                        warn!(error = %err, "pick up failed");
                    }
                }
                if let Some(chest) = self.chest
                    && let Err(err) = client.send_command(chest, chest_object::NAME, "shout", &"anyone here?".to_string())
                {
                    debug!(error = %err, "chest not visible to client 0");
                }
            }
            90 => {
                if let Some(chest) = self.chest
                    && let Err(err) = self.server.send_sync_event(chest, chest_object::NAME, "announce", &"the chest creaks".to_string())
                {
                    warn!(error = %err, "announce failed");
                }
            }
            120 => {
                if let Some(&id) = self.crates.get(1)
                    && let Some(name) = self.server.entity_mut(id).and_then(|e| e.get_mut::<Name>())
                {
                    name.rename("opened crate");
                }
            }
            _ => {}
        }
    }

    /// Log what each client currently sees.
    pub fn report(&self) {
        info!(
            connections = self.server.connection_ids().len(),
            entities = self.server.context().len(),
            "server"
        );
        for (index, client) in self.clients.iter().enumerate() {
            let player = client.local_player().and_then(|id| client.entity(id));
            let health = player.and_then(|e| e.get::<Health>()).map(Health::current);
            let items = player.and_then(|e| e.get::<Inventory>()).map(Inventory::len);
            let crates_seen = self
                .crates
                .iter()
                .filter(|id| client.entity(**id).is_some())
                .count();
            let crate_name = self
                .crates
                .get(1)
                .and_then(|id| client.entity(*id))
                .and_then(|e| e.get::<Name>())
                .map(|name| name.value().to_string());
            info!(
                client = index,
                state = ?client.state(),
                entities = client.context().len(),
                crates_seen,
                crate_name = ?crate_name,
                health = ?health,
                items = ?items,
                rtt_ms = ?client.rtt().smoothed.map(|rtt| rtt.as_secs_f64() * 1000.0),
                "client"
            );
        }
    }

    /// Disconnect every client and stop the server.
    pub fn shutdown(&mut self, now: Instant) {
        for client in &mut self.clients {
            client.disconnect();
        }
        self.server.update(now);
        self.server.stop();
    }
}

impl Step for Simulation {
    fn step(&mut self, tick_id: u64, now: Instant, dt: Duration) {
        self.request_players();
        if tick_id % STEER_EVERY == 0 {
            self.steer(tick_id);
        }
        self.integrate(dt);
        if tick_id % REBUILD_EVERY == 0 {
            self.server.rebuild_all_observers();
        }
        if tick_id % DAMAGE_EVERY == 0 {
            self.damage_first_player();
        }
        self.scripted(tick_id);

        self.server.update(now);
        for client in &mut self.clients {
            client.update(now);
        }

        if tick_id % REPORT_EVERY == 0 {
            self.report();
        }
    }
}
