//! Example replicated components.
//!
//! These demonstrate how to implement [`Replicated`]: embed a [`SyncState`],
//! route every field write through [`SyncState::set`] so the right dirty bit
//! is raised, and write/read fields in bit order.
//!
//! [`prefabs`] wires them into templates and remote calls for the demo
//! binary and the integration tests.

pub mod prefabs;

use std::any::Any;
use std::collections::BTreeSet;

use netsync_component::{
    ComponentError, ConnectionId, DirtyBits, ObserverCandidate, Replicated, SyncList, SyncObject, SyncState,
};
use netsync_math::{Pose, Vec3};
use netsync_wire::{MsgPack, NetworkReader, NetworkWriter, WireError};
use serde::{Deserialize, Serialize};

fn write_vec3(writer: &mut NetworkWriter, v: Vec3) {
    writer.write_f32(v.x);
    writer.write_f32(v.y);
    writer.write_f32(v.z);
}

fn read_vec3(reader: &mut NetworkReader<'_>) -> Result<Vec3, WireError> {
    Ok(Vec3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?))
}

macro_rules! replicated_boilerplate {
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

/// A 3D velocity component.
#[derive(Debug, Clone, Default)]
pub struct Velocity {
    linear: Vec3,
    sync: SyncState,
}

impl Velocity {
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            linear: Vec3::new(x, y, z),
            sync: SyncState::new(),
        }
    }

    /// Linear velocity in world units per second.
    #[must_use]
    pub fn linear(&self) -> Vec3 {
        self.linear
    }

    pub fn set_linear(&mut self, linear: Vec3) {
        self.sync.set(0, &mut self.linear, linear);
    }

    /// Add `acceleration * dt` to the velocity.
    pub fn accelerate(&mut self, acceleration: Vec3, dt: f32) {
        self.set_linear(self.linear + acceleration * dt);
    }
}

impl Replicated for Velocity {
    replicated_boilerplate!("Velocity");

    fn field_count(&self) -> usize {
        1
    }

    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            write_vec3(writer, self.linear);
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            self.linear = read_vec3(reader)?;
        }
        Ok(())
    }
}

/// A health component with current and maximum hit points.
#[derive(Debug, Clone, Default)]
pub struct Health {
    current: f32,
    max: f32,
    /// Last damage announced by the server. Local only.
    last_hit: Option<f32>,
    sync: SyncState,
}

impl Health {
    /// Create a new health component at full HP.
    #[must_use]
    pub fn full(max: f32) -> Self {
        Self {
            current: max,
            max,
            last_hit: None,
            sync: SyncState::new(),
        }
    }

    #[must_use]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[must_use]
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Returns `true` if the entity is alive (HP > 0).
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.current > 0.0
    }

    /// Apply damage, clamping to zero.
    pub fn damage(&mut self, amount: f32) {
        let current = (self.current - amount).max(0.0);
        self.sync.set(0, &mut self.current, current);
    }

    /// Heal, clamping to max.
    pub fn heal(&mut self, amount: f32) {
        let current = (self.current + amount).min(self.max);
        self.sync.set(0, &mut self.current, current);
    }

    pub fn set_max(&mut self, max: f32) {
        self.sync.set(1, &mut self.max, max);
        let current = self.current.min(max);
        self.sync.set(0, &mut self.current, current);
    }

    #[must_use]
    pub fn last_hit(&self) -> Option<f32> {
        self.last_hit
    }

    pub fn record_hit(&mut self, amount: f32) {
        self.last_hit = Some(amount);
    }
}

impl Replicated for Health {
    replicated_boilerplate!("Health");

    fn field_count(&self) -> usize {
        2
    }

    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            writer.write_f32(self.current);
        }
        if mask.contains(1) {
            writer.write_f32(self.max);
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            self.current = reader.read_f32()?;
        }
        if mask.contains(1) {
            self.max = reader.read_f32()?;
        }
        Ok(())
    }
}

/// A display name.
#[derive(Debug, Clone, Default)]
pub struct Name {
    value: String,
    /// Announcements received through sync events. Local only.
    announcements: Vec<String>,
    sync: SyncState,
}

impl Name {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            value: name.into(),
            announcements: Vec::new(),
            sync: SyncState::new(),
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.sync.set(0, &mut self.value, name.into());
    }

    #[must_use]
    pub fn announcements(&self) -> &[String] {
        &self.announcements
    }

    pub fn announce(&mut self, text: String) {
        self.announcements.push(text);
    }
}

impl Replicated for Name {
    replicated_boilerplate!("Name");

    fn field_count(&self) -> usize {
        1
    }

    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            writer.write_str(&self.value);
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            self.value = reader.read_str()?.to_owned();
        }
        Ok(())
    }
}

/// An inventory entry. Replicated as MessagePack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub count: u32,
}

impl Item {
    #[must_use]
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// A replicated list of items.
#[derive(Default)]
pub struct Inventory {
    items: SyncList<MsgPack<Item>>,
    sync: SyncState,
}

impl Inventory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `item`, stacking onto an entry with the same name.
    ///
    /// # Errors
    ///
    /// Fails on a receiving peer, where the list is read-only.
    pub fn add(&mut self, item: Item) -> Result<(), ComponentError> {
        match self.items.iter().position(|entry| entry.name == item.name) {
            Some(index) => self.items.modify(index, |entry| entry.count += item.count),
            None => self.items.push(MsgPack(item)),
        }
    }

    /// Remove the entry named `name`. Returns `true` if there was one.
    ///
    /// # Errors
    ///
    /// Fails on a receiving peer, where the list is read-only.
    pub fn remove(&mut self, name: &str) -> Result<bool, ComponentError> {
        match self.items.iter().position(|entry| entry.name == name) {
            Some(index) => self.items.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().map(|entry| &entry.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The underlying list, for installing change callbacks.
    pub fn list_mut(&mut self) -> &mut SyncList<MsgPack<Item>> {
        &mut self.items
    }
}

impl Replicated for Inventory {
    replicated_boilerplate!("Inventory");

    fn sync_objects(&self) -> Vec<&dyn SyncObject> {
        vec![&self.items as &dyn SyncObject]
    }

    fn sync_objects_mut(&mut self) -> Vec<&mut dyn SyncObject> {
        vec![&mut self.items as &mut dyn SyncObject]
    }
}

/// Visible only to connections whose player is within `radius`.
#[derive(Debug, Clone, Default)]
pub struct Proximity {
    radius: f32,
    sync: SyncState,
}

impl Proximity {
    #[must_use]
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            sync: SyncState::new(),
        }
    }

    #[must_use]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.sync.set(0, &mut self.radius, radius);
    }

    fn admits(&self, pose: &Pose, candidate: &ObserverCandidate) -> bool {
        candidate
            .player_pose
            .is_some_and(|player| player.distance(pose) <= self.radius)
    }
}

impl Replicated for Proximity {
    replicated_boilerplate!("Proximity");

    fn field_count(&self) -> usize {
        1
    }

    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            writer.write_f32(self.radius);
        }
        Ok(())
    }

    fn read_fields(&mut self, reader: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
        if mask.contains(0) {
            self.radius = reader.read_f32()?;
        }
        Ok(())
    }

    fn rebuild_observers(
        &self,
        pose: &Pose,
        candidates: &[ObserverCandidate],
        observers: &mut BTreeSet<ConnectionId>,
        _initial: bool,
    ) -> bool {
        observers.extend(
            candidates
                .iter()
                .filter(|candidate| self.admits(pose, candidate))
                .map(|candidate| candidate.connection),
        );
        true
    }

    fn check_observer(&self, pose: &Pose, candidate: &ObserverCandidate) -> Option<bool> {
        Some(self.admits(pose, candidate))
    }
}
