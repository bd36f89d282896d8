//! Spawn, delta and destroy as seen on the wire and by a mirroring client.

mod common;

use std::time::Instant;

use bytes::Bytes;
use common::{ADDRESS, Counter, Faulty, Harness, MIXED_ASSET, TICK, Tags, calls, init_tracing, instantiate, templates};
use netsync_component::{DirtyBits, NetworkId};
use netsync_math::Pose;
use netsync_net::messages::{ObjectDestroyMessage, ReadyMessage, SpawnPrefabMessage, UpdateVarsMessage};
use netsync_net::{Channel, LoopbackHub, LoopbackTransport, MessageType, Transport, TransportEvent, frame};
use netsync_replication::{NetworkServer, ReplicationConfig, TemplateRegistry};
use netsync_wire::{NetworkReader, WireCodec};

fn frames(transport: &mut LoopbackTransport) -> Vec<Bytes> {
    std::iter::from_fn(|| transport.poll_event())
        .filter_map(|event| match event {
            TransportEvent::Data(_, _, bytes) => Some(bytes),
            _ => None,
        })
        .collect()
}

fn message_type(frame: &[u8]) -> MessageType {
    frame::unpack(frame).unwrap().0
}

fn decode<M: WireCodec>(bytes: &[u8]) -> M {
    let (_, mut reader) = frame::unpack(bytes).unwrap();
    let message = M::decode(&mut reader).unwrap();
    reader.finish().unwrap();
    message
}

#[test]
fn test_spawn_delta_destroy_on_the_wire() {
    init_tracing();
    let hub = LoopbackHub::new();
    let config = ReplicationConfig::default().with_listen_address(ADDRESS);
    let mut server = NetworkServer::new(config, hub.transport(), templates(false), calls());
    server.listen().unwrap();
    let t0 = Instant::now();

    let mut entity = instantiate(MIXED_ASSET);
    let counter = entity.get_mut::<Counter>().unwrap();
    counter.set_value(3);
    counter.set_label("e");
    entity.clear_dirty(t0);
    let id = server.spawn(entity).unwrap();
    assert_eq!(id, NetworkId(1));

    let mut peer = hub.transport();
    let local = peer.connect(ADDRESS).unwrap();
    server.update(t0);
    peer.send(local, Channel::Reliable, frame::pack(&ReadyMessage).unwrap())
        .unwrap();
    server.update(t0);

    // One spawn with the full state, then the end of the initial batch.
    let received = frames(&mut peer);
    assert_eq!(received.len(), 2);
    assert_eq!(message_type(&received[0]), MessageType::SPAWN_PREFAB);
    assert_eq!(message_type(&received[1]), MessageType::SPAWN_FINISHED);
    let spawn: SpawnPrefabMessage = decode(&received[0]);
    assert_eq!(spawn.net_id, id);
    assert_eq!(spawn.asset_id, MIXED_ASSET);
    assert!(!spawn.is_owner);

    let mut mirror = templates(false).instantiate(MIXED_ASSET, &Pose::IDENTITY).unwrap();
    let report = mirror.deserialize(&mut NetworkReader::new(&spawn.payload), true).unwrap();
    assert!(report.is_clean());
    assert_eq!(mirror.get::<Counter>().unwrap().value, 3);
    assert_eq!(mirror.get::<Counter>().unwrap().label, "e");

    // One changed component produces one delta carrying only that component.
    server.entity_mut(id).unwrap().get_mut::<Faulty>().unwrap().set_value(9);
    server.update(t0 + TICK);
    let received = frames(&mut peer);
    assert_eq!(received.len(), 1);
    let update: UpdateVarsMessage = decode(&received[0]);
    assert_eq!(update.net_id, id);
    let mut reader = NetworkReader::new(&update.payload);
    assert_eq!(DirtyBits(reader.read_u64().unwrap()), DirtyBits(0b010));

    mirror.deserialize(&mut NetworkReader::new(&update.payload), false).unwrap();
    assert_eq!(mirror.get::<Faulty>().unwrap().value, 9);

    // Cleared on write: nothing left to send in the same tick.
    assert!(!server.entity(id).unwrap().is_dirty(t0 + TICK * 2));
    server.broadcast_deltas(t0 + TICK * 2);
    assert!(frames(&mut peer).is_empty());

    server.destroy(id).unwrap();
    let received = frames(&mut peer);
    assert_eq!(received.len(), 1);
    let destroy: ObjectDestroyMessage = decode(&received[0]);
    assert_eq!(destroy.net_id, id);
}

#[test]
fn test_client_mirrors_spawn_delta_destroy() {
    let mut h = Harness::new();
    let id = h.spawn(MIXED_ASSET);
    let c = h.connect_ready();
    assert!(h.client(c).spawn_finished());
    assert!(h.client(c).entity(id).is_some());

    let entity = h.server.entity_mut(id).unwrap();
    entity.get_mut::<Counter>().unwrap().set_value(42);
    entity.get_mut::<Tags>().unwrap().list.push(7).unwrap();
    h.tick();

    let mirror = h.client(c).entity(id).unwrap();
    assert_eq!(mirror.get::<Counter>().unwrap().value, 42);
    assert_eq!(mirror.get::<Tags>().unwrap().list.as_slice(), &[7]);
    assert!(mirror.get::<Tags>().unwrap().list.is_read_only());

    h.server.destroy(id).unwrap();
    h.tick();
    assert!(h.client(c).entity(id).is_none());
    assert!(h.client(c).context().is_empty());
}

#[test]
fn test_unobserved_changes_do_not_pile_up() {
    let mut h = Harness::new();
    let id = h.spawn(MIXED_ASSET);
    h.server.entity_mut(id).unwrap().get_mut::<Counter>().unwrap().set_value(1);
    h.tick();
    assert!(!h.server.entity(id).unwrap().is_dirty(h.now + TICK));

    // A late observer still gets the current value in its spawn.
    let c = h.connect_ready();
    assert_eq!(h.client(c).entity(id).unwrap().get::<Counter>().unwrap().value, 1);
}
