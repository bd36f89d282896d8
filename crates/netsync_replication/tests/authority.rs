//! Player ownership, explicit authority and command gating.

mod common;

use common::{Counter, Harness};
use netsync_component::{Authority, NetworkId};
use netsync_replication::ReplicationError;

fn server_value(h: &Harness, id: NetworkId) -> i32 {
    h.server.entity(id).unwrap().get::<Counter>().unwrap().value
}

fn client_authority(h: &Harness, client: usize, id: NetworkId) -> bool {
    h.client(client).entity(id).unwrap().has_authority()
}

/// Two clients; the first owns a player the second can see.
fn two_players() -> (Harness, NetworkId) {
    let mut h = Harness::new();
    let owner = h.connect();
    h.client_mut(owner).add_player().unwrap();
    h.settle();
    h.connect_ready();
    let player = h.client(owner).local_player().unwrap();
    (h, player)
}

#[test]
fn test_owner_gets_player_and_authority() {
    let (h, player) = two_players();
    let entity = h.server.entity(player).unwrap();
    assert_eq!(entity.player_owner(), Some(h.conns[0]));
    assert_eq!(entity.authority(), Authority::Player(h.conns[0]));
    assert_eq!(h.server.connection(h.conns[0]).unwrap().player(), Some(player));

    assert!(h.client(0).entity(player).unwrap().is_local_player());
    assert!(client_authority(&h, 0, player));
    assert!(!h.client(1).entity(player).unwrap().is_local_player());
    assert!(!client_authority(&h, 1, player));
    assert_eq!(h.client(1).local_player(), None);
}

#[test]
fn test_commands_need_authority_unless_exempt() {
    let (mut h, player) = two_players();

    h.client_mut(1).send_command(player, 0, "bump", &5i32).unwrap();
    h.settle();
    assert_eq!(server_value(&h, player), 0);

    h.client_mut(1).send_command(player, 0, "poke", &()).unwrap();
    h.settle();
    assert_eq!(server_value(&h, player), 1);

    h.client_mut(0).send_command(player, 0, "bump", &5i32).unwrap();
    h.settle();
    assert_eq!(server_value(&h, player), 6);
    assert_eq!(h.client(1).entity(player).unwrap().get::<Counter>().unwrap().value, 6);
}

#[test]
fn test_assign_and_revoke_move_authority() {
    let (mut h, player) = two_players();
    let (first, second) = (h.conns[0], h.conns[1]);

    h.server.assign_authority(player, second).unwrap();
    h.settle();
    assert_eq!(h.server.entity(player).unwrap().authority(), Authority::Granted(second));
    assert!(!client_authority(&h, 0, player));
    assert!(client_authority(&h, 1, player));
    assert!(h.server.connection(second).unwrap().owned().contains(&player));
    assert!(!h.server.connection(first).unwrap().owned().contains(&player));

    h.client_mut(1).send_command(player, 0, "bump", &10i32).unwrap();
    h.client_mut(0).send_command(player, 0, "bump", &1i32).unwrap();
    h.settle();
    assert_eq!(server_value(&h, player), 10);

    // Explicit grants are not silently taken over.
    assert!(matches!(
        h.server.assign_authority(player, first),
        Err(ReplicationError::AuthorityHeld { holder, .. }) if holder == second
    ));
    h.server.assign_authority(player, second).unwrap();

    // Revoking a grant falls back to the owning player, then to the server.
    h.server.revoke_authority(player).unwrap();
    h.settle();
    assert_eq!(h.server.entity(player).unwrap().authority(), Authority::Player(first));
    assert!(client_authority(&h, 0, player));
    assert!(!client_authority(&h, 1, player));

    h.server.revoke_authority(player).unwrap();
    h.settle();
    assert_eq!(h.server.entity(player).unwrap().authority(), Authority::Server);
    assert!(!client_authority(&h, 0, player));
    assert!(matches!(
        h.server.revoke_authority(player),
        Err(ReplicationError::NoAuthority(id)) if id == player
    ));

    let changes = &h.client(0).entity(player).unwrap().get::<Counter>().unwrap().authority_changes;
    assert_eq!(changes, &[true, false, true, false]);
    let changes = &h.client(1).entity(player).unwrap().get::<Counter>().unwrap().authority_changes;
    assert_eq!(changes, &[true, false]);
}

#[test]
fn test_second_add_player_is_refused() {
    let (mut h, player) = two_players();
    h.client_mut(0).add_player().unwrap();
    h.settle();
    assert_eq!(h.server.connection(h.conns[0]).unwrap().player(), Some(player));
    assert!(h.client(0).last_error().unwrap().contains("already has player"));
    assert_eq!(h.server.context().len(), 1);
}

#[test]
fn test_disconnect_releases_granted_authority() {
    let (mut h, player) = two_players();
    h.server.assign_authority(player, h.conns[1]).unwrap();
    h.settle();

    h.client_mut(1).disconnect();
    h.settle();
    assert_eq!(h.server.entity(player).unwrap().authority(), Authority::Player(h.conns[0]));
    assert!(client_authority(&h, 0, player));
}
