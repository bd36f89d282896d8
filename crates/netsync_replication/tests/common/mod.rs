//! Shared fixtures: small replicated components, templates for both peers
//! and a harness that ticks one server and its clients over a loopback hub.

#![allow(dead_code)]

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Once;
use std::time::{Duration, Instant};

use netsync_component::{
    AssetId, ConnectionId, DirtyBits, NetworkId, ObserverCandidate, Replicated, ReplicatedEntity, SceneId, SyncList,
    SyncObject, SyncState,
};
use netsync_math::Pose;
use netsync_net::LoopbackHub;
use netsync_replication::{
    NetworkClient, NetworkServer, RemoteCalls, ReplicationConfig, TemplateRegistry, Templates,
};
use netsync_wire::{NetworkReader, NetworkWriter, WireError};
use tracing_subscriber::EnvFilter;

pub const ADDRESS: &str = "loopback://test";
pub const TICK: Duration = Duration::from_millis(100);

pub const PLAYER_ASSET: AssetId = AssetId::from_u128(0x01);
/// Counter, Faulty, Tags.
pub const MIXED_ASSET: AssetId = AssetId::from_u128(0x02);
/// Zone only.
pub const ZONE_ASSET: AssetId = AssetId::from_u128(0x03);
/// Vault only.
pub const VAULT_ASSET: AssetId = AssetId::from_u128(0x04);
pub const SCENE_ID: SceneId = SceneId(7);

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}

macro_rules! boilerplate {
    ($name:literal) => {
        fn type_name(&self) -> &'static str {
            $name
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    };
}

/// Two fields: a value and a label.
#[derive(Debug, Default)]
pub struct Counter {
    pub value: i32,
    pub label: String,
    /// RPC arguments received. Local only.
    pub flashes: Vec<String>,
    pub authority_changes: Vec<bool>,
    sync: SyncState,
}

impl Counter {
    pub fn set_value(&mut self, value: i32) {
        self.sync.set(0, &mut self.value, value);
    }

    pub fn set_label(&mut self, label: &str) {
        self.sync.set(1, &mut self.label, label.to_owned());
    }
}

impl Replicated for Counter {
    boilerplate!("Counter");

    fn field_count(&self) -> usize {
        2
    }

    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            writer.write_i32(self.value);
        }
        if mask.contains(1) {
            writer.write_str(&self.label);
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            self.value = reader.read_i32()?;
        }
        if mask.contains(1) {
            self.label = reader.read_str()?.to_owned();
        }
        Ok(())
    }

    fn on_authority_changed(&mut self, has_authority: bool) {
        self.authority_changes.push(has_authority);
    }
}

/// Writes a value; on a peer built with `fail`, reading always errors.
#[derive(Debug, Default)]
pub struct Faulty {
    pub value: i32,
    pub fail: bool,
    sync: SyncState,
}

impl Faulty {
    pub fn set_value(&mut self, value: i32) {
        self.sync.set(0, &mut self.value, value);
    }
}

impl Replicated for Faulty {
    boilerplate!("Faulty");

    fn field_count(&self) -> usize {
        1
    }

    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            writer.write_i32(self.value);
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
        if self.fail {
            return Err(WireError::custom("faulty component"));
        }
        if mask.contains(0) {
            self.value = reader.read_i32()?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Tags {
    pub list: SyncList<u32>,
    sync: SyncState,
}

impl Replicated for Tags {
    boilerplate!("Tags");

    fn sync_objects(&self) -> Vec<&dyn SyncObject> {
        vec![&self.list as &dyn SyncObject]
    }

    fn sync_objects_mut(&mut self) -> Vec<&mut dyn SyncObject> {
        vec![&mut self.list as &mut dyn SyncObject]
    }
}

/// Custom visibility: exactly the listed connections.
#[derive(Debug, Default)]
pub struct Zone {
    pub allowed: BTreeSet<ConnectionId>,
    sync: SyncState,
}

impl Replicated for Zone {
    boilerplate!("Zone");

    fn rebuild_observers(
        &self,
        _pose: &Pose,
        _candidates: &[ObserverCandidate],
        observers: &mut BTreeSet<ConnectionId>,
        _initial: bool,
    ) -> bool {
        observers.extend(self.allowed.iter().copied());
        true
    }

    fn check_observer(&self, _pose: &Pose, candidate: &ObserverCandidate) -> Option<bool> {
        Some(self.allowed.contains(&candidate.connection))
    }
}

/// Custom visibility through the rebuild alone, with no per-connection
/// check.
#[derive(Debug, Default)]
pub struct Vault {
    pub allowed: BTreeSet<ConnectionId>,
    sync: SyncState,
}

impl Replicated for Vault {
    boilerplate!("Vault");

    fn rebuild_observers(
        &self,
        _pose: &Pose,
        candidates: &[ObserverCandidate],
        observers: &mut BTreeSet<ConnectionId>,
        _initial: bool,
    ) -> bool {
        observers.extend(
            candidates
                .iter()
                .map(|c| c.connection)
                .filter(|c| self.allowed.contains(c)),
        );
        true
    }
}

/// A pending instance of `asset` as the server builds it.
pub fn instantiate(asset: AssetId) -> ReplicatedEntity {
    templates(false).instantiate(asset, &Pose::IDENTITY).unwrap()
}

/// Templates for one peer. Clients built with `faulty` cannot decode
/// [`Faulty`].
pub fn templates(faulty: bool) -> Templates {
    let mut templates = Templates::new();
    templates.register_prefab(PLAYER_ASSET, "player", |entity| {
        entity.add_component(Box::new(Counter::default()))?;
        Ok(())
    });
    templates.register_prefab(MIXED_ASSET, "mixed", move |entity| {
        entity.add_component(Box::new(Counter::default()))?;
        entity.add_component(Box::new(Faulty {
            fail: faulty,
            ..Faulty::default()
        }))?;
        entity.add_component(Box::new(Tags::default()))?;
        Ok(())
    });
    templates.register_prefab(ZONE_ASSET, "zone", |entity| {
        entity.add_component(Box::new(Zone::default()))?;
        Ok(())
    });
    templates.register_prefab(VAULT_ASSET, "vault", |entity| {
        entity.add_component(Box::new(Vault::default()))?;
        Ok(())
    });
    templates.add_scene_object(
        ReplicatedEntity::scene(SCENE_ID)
            .with_component(Counter::default())
            .unwrap_or_else(|err| panic!("scene object: {err}")),
    );
    templates
}

/// `bump` command, `flash` RPC and `label` sync event on [`Counter`]; an
/// authority-free `poke` command.
pub fn calls() -> RemoteCalls {
    let mut calls = RemoteCalls::new();
    calls.command::<Counter, _>("bump", |counter, _, reader| {
        let amount = reader.read_i32()?;
        counter.set_value(counter.value + amount);
        Ok(())
    });
    calls.command::<Counter, _>("poke", |counter, _, _| {
        counter.set_value(counter.value + 1);
        Ok(())
    });
    calls.allow_without_authority("poke");
    calls.rpc::<Counter, _>("flash", |counter, _, reader| {
        counter.flashes.push(reader.read()?);
        Ok(())
    });
    calls.sync_event::<Counter, _>("label", |counter, _, reader| {
        counter.label = reader.read()?;
        Ok(())
    });
    calls
}

/// One server and any number of clients sharing a loopback hub.
pub struct Harness {
    pub hub: LoopbackHub,
    pub server: NetworkServer,
    pub clients: Vec<NetworkClient>,
    /// Server-side connection id of each client.
    pub conns: Vec<ConnectionId>,
    pub now: Instant,
    faulty_clients: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReplicationConfig::default(), false)
    }

    pub fn with_config(config: ReplicationConfig, faulty_clients: bool) -> Self {
        init_tracing();
        let hub = LoopbackHub::new();
        let config = config.with_listen_address(ADDRESS).with_player_asset(PLAYER_ASSET);
        let mut server = NetworkServer::new(config, hub.transport(), templates(false), calls());
        server.listen().unwrap();
        Self {
            hub,
            server,
            clients: Vec::new(),
            conns: Vec::new(),
            now: Instant::now(),
            faulty_clients,
        }
    }

    /// Connect a new client and return its index.
    pub fn connect(&mut self) -> usize {
        let mut client = NetworkClient::new(
            ReplicationConfig::default(),
            self.hub.transport(),
            templates(self.faulty_clients),
            calls(),
        );
        client.connect(ADDRESS).unwrap();
        self.clients.push(client);
        let before = self.server.connection_ids();
        self.tick();
        let conn = self
            .server
            .connection_ids()
            .into_iter()
            .find(|id| !before.contains(id))
            .unwrap();
        self.conns.push(conn);
        self.clients.len() - 1
    }

    /// Connect a client and make it ready.
    pub fn connect_ready(&mut self) -> usize {
        let index = self.connect();
        self.clients[index].ready().unwrap();
        self.settle();
        index
    }

    /// Advance the clock one send interval and update every peer once.
    pub fn tick(&mut self) {
        self.now += TICK;
        self.server.update(self.now);
        for client in &mut self.clients {
            client.update(self.now);
        }
    }

    /// Instantiate `asset` from the server-side templates and spawn it.
    pub fn spawn(&mut self, asset: AssetId) -> NetworkId {
        self.server.spawn(instantiate(asset)).unwrap()
    }

    /// Tick until requests and replies have crossed both ways.
    pub fn settle(&mut self) {
        for _ in 0..3 {
            self.tick();
        }
    }

    pub fn client(&self, index: usize) -> &NetworkClient {
        &self.clients[index]
    }

    pub fn client_mut(&mut self, index: usize) -> &mut NetworkClient {
        &mut self.clients[index]
    }
}
