//! Templates and remote calls built from the example components.
//!
//! Both peers must build the same tables: the server to spawn and to accept
//! commands, the client to resolve spawns and run RPCs.

use netsync_component::{AssetId, ComponentError, ReplicatedEntity, SceneId};
use netsync_math::{Pose, Vec3};
use netsync_replication::{RemoteCalls, ReplicationError, TemplateRegistry, Templates};
use netsync_wire::{MsgPack, WireError};
use tracing::info;

use crate::{Health, Inventory, Item, Name, Proximity, Velocity};

pub const PLAYER_ASSET: AssetId = AssetId::from_u128(0x6e65_7473_796e_6370_6c61_7965_7200_0001);
pub const CRATE_ASSET: AssetId = AssetId::from_u128(0x6e65_7473_796e_6363_7261_7465_0000_0002);

/// The pre-placed chest every scene contains.
pub const CHEST_SCENE_ID: SceneId = SceneId(1);

/// Component indices of the player prefab.
pub mod player {
    pub const NAME: usize = 0;
    pub const HEALTH: usize = 1;
    pub const VELOCITY: usize = 2;
    pub const INVENTORY: usize = 3;
}

/// Component indices of the crate prefab.
pub mod crate_prefab {
    pub const NAME: usize = 0;
    pub const PROXIMITY: usize = 1;
}

/// Component indices of the chest scene object.
pub mod chest_object {
    pub const NAME: usize = 0;
    pub const INVENTORY: usize = 1;
}

/// Visibility radius of crates.
pub const CRATE_RADIUS: f32 = 20.0;

/// The chest scene object, dormant.
///
/// # Errors
///
/// Never fails with the components it adds; the signature follows
/// [`ReplicatedEntity::with_component`].
pub fn chest() -> Result<ReplicatedEntity, ComponentError> {
    ReplicatedEntity::scene(CHEST_SCENE_ID)
        .with_component(Name::new("chest"))?
        .with_component(Inventory::new())
}

/// Player and crate prefabs plus the chest scene object.
///
/// # Errors
///
/// Propagates [`chest`]'s error.
pub fn templates() -> Result<Templates, ComponentError> {
    let mut templates = Templates::new();
    templates.register_prefab(PLAYER_ASSET, "player", |entity| {
        entity.add_component(Box::new(Name::new("player")))?;
        entity.add_component(Box::new(Health::full(100.0)))?;
        entity.add_component(Box::new(Velocity::default()))?;
        entity.add_component(Box::new(Inventory::new()))?;
        Ok(())
    });
    templates.register_prefab(CRATE_ASSET, "crate", |entity| {
        entity.add_component(Box::new(Name::new("crate")))?;
        entity.add_component(Box::new(Proximity::new(CRATE_RADIUS)))?;
        Ok(())
    });
    templates.add_scene_object(chest()?);
    Ok(templates)
}

/// A crate at `position`, ready to spawn.
///
/// # Errors
///
/// Fails only if the crate template is missing from `templates`.
pub fn crate_at(templates: &Templates, position: Vec3) -> Result<ReplicatedEntity, ReplicationError> {
    templates.instantiate(CRATE_ASSET, &Pose::from_position(position))
}

/// Commands, RPCs and sync events of the example components.
///
/// | kind       | method         | component   | arguments      |
/// |------------|----------------|-------------|----------------|
/// | command    | `heal`         | `Health`    | `f32`          |
/// | command    | `set_velocity` | `Velocity`  | `(f32, f32, f32)` |
/// | command    | `pick_up`      | `Inventory` | `MsgPack<Item>` |
/// | command    | `shout`        | `Name`      | `String`, any observer |
/// | rpc        | `on_damaged`   | `Health`    | `f32`          |
/// | sync event | `announce`     | `Name`      | `String`       |
#[must_use]
pub fn remote_calls() -> RemoteCalls {
    let mut calls = RemoteCalls::new();
    calls.command::<Health, _>("heal", |health, _, reader| {
        health.heal(reader.read_f32()?);
        Ok(())
    });
    calls.command::<Velocity, _>("set_velocity", |velocity, _, reader| {
        let (x, y, z): (f32, f32, f32) = reader.read()?;
        velocity.set_linear(Vec3::new(x, y, z));
        Ok(())
    });
    calls.command::<Inventory, _>("pick_up", |inventory, ctx, reader| {
        let MsgPack(item) = reader.read::<MsgPack<Item>>()?;
        info!(net_id = %ctx.net_id, item = %item.name, count = item.count, "picked up");
        inventory.add(item).map_err(WireError::custom)
    });
    calls.command::<Name, _>("shout", |name, ctx, reader| {
        let text: String = reader.read()?;
        info!(net_id = %ctx.net_id, sender = ?ctx.sender, %text, "shout");
        name.announce(text);
        Ok(())
    });
    calls.allow_without_authority("shout");
    calls.rpc::<Health, _>("on_damaged", |health, _, reader| {
        health.record_hit(reader.read_f32()?);
        Ok(())
    });
    calls.sync_event::<Name, _>("announce", |name, _, reader| {
        name.announce(reader.read()?);
        Ok(())
    });
    calls
}
