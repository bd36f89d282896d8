//! The [`Replicated`] capability and per-component dirty-bit serialization.
//!
//! A replicated component is one syncable unit inside an entity. It owns up
//! to 64 dirty-tracked fields and any number (up to 64) of nested
//! [`SyncObject`]s.
//!
//! ## Component payload layout
//!
//! ```text
//! initial:  fields(all) || sync_object[0].all || sync_object[1].all || ...
//! delta:    varint(field mask) || fields(mask)
//!           || varint(object mask) || sync_object[i].delta for each set bit
//! ```
//!
//! ## Type identity
//!
//! [`ComponentTypeId`] is derived from the component's name with FNV-1a
//! 64-bit; [`MethodHash`] is FNV-1a 32-bit over a remote method's declared
//! name. Both are language-neutral so every peer computes the same values.

use std::any::Any;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use netsync_math::Pose;
use netsync_wire::{NetworkReader, NetworkWriter, WireCodec, WireError};
use serde::{Deserialize, Serialize};

use crate::dirty::DirtyBits;
use crate::id::ConnectionId;
use crate::sync_object::SyncObject;

/// Default minimum time between two delta sends of the same component.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(100);

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's name.
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }
}

/// Stable 32-bit hash of a remote method's declared name.
///
/// Collisions are not detected; two methods of the same kind whose names
/// hash alike share one dispatch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodHash(pub u32);

impl MethodHash {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    /// FNV-1a 32-bit over the UTF-8 bytes of `name`.
    #[must_use]
    pub const fn of(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }
}

impl WireCodec for MethodHash {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_u32(self.0);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self(reader.read_u32()?))
    }
}

/// A connection being considered as an observer of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverCandidate {
    /// The ready connection.
    pub connection: ConnectionId,
    /// Pose of that connection's player entity, if it has one.
    pub player_pose: Option<Pose>,
}

/// Dirty-bit and send-interval bookkeeping embedded in every component.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    dirty: DirtyBits,
    send_interval: Option<Duration>,
    last_sync: Option<Instant>,
}

impl SyncState {
    /// Fresh state using the context's default send interval.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state with an explicit send interval.
    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            send_interval: Some(interval),
            ..Self::default()
        }
    }

    /// Dirty field bits since the last send.
    #[must_use]
    pub fn dirty(&self) -> DirtyBits {
        self.dirty
    }

    /// Mark field `bit` as changed.
    pub fn mark_dirty(&mut self, bit: usize) {
        self.dirty.insert(bit);
    }

    /// Assign `value` to `slot` and mark `bit` dirty if it changed.
    ///
    /// Returns `true` if the value changed.
    pub fn set<T: PartialEq>(&mut self, bit: usize, slot: &mut T, value: T) -> bool {
        if *slot == value {
            return false;
        }
        *slot = value;
        self.mark_dirty(bit);
        true
    }

    /// Effective send interval.
    #[must_use]
    pub fn send_interval(&self) -> Duration {
        self.send_interval.unwrap_or(DEFAULT_SEND_INTERVAL)
    }

    /// Use `interval` unless the component chose its own.
    pub fn apply_default_interval(&mut self, interval: Duration) {
        self.send_interval.get_or_insert(interval);
    }

    /// Returns `true` once a full send interval has passed since the last send.
    #[must_use]
    pub fn interval_elapsed(&self, now: Instant) -> bool {
        self.last_sync
            .is_none_or(|last| now.saturating_duration_since(last) >= self.send_interval())
    }

    /// Clear the field bits and restart the send interval.
    pub fn clear(&mut self, now: Instant) {
        self.dirty.clear();
        self.last_sync = Some(now);
    }

    /// Forget the send history. The configured interval is kept.
    pub fn reset(&mut self) {
        self.dirty.clear();
        self.last_sync = None;
    }
}

/// The replication capability of a component.
///
/// Implementors embed a [`SyncState`] and describe how their fields map to
/// dirty bits. Everything else has a default.
pub trait Replicated: Any {
    /// A human-readable, peer-stable name for this component type.
    fn type_name(&self) -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id(&self) -> ComponentTypeId {
        ComponentTypeId::from_name(self.type_name())
    }

    /// Returns `true` if this component is, or derives from, `ty`.
    ///
    /// Remote-call handlers registered for `ty` may run on this component.
    /// Override to expose a base type.
    fn is_a(&self, ty: ComponentTypeId) -> bool {
        self.component_type_id() == ty
    }

    fn sync_state(&self) -> &SyncState;

    fn sync_state_mut(&mut self) -> &mut SyncState;

    /// Number of dirty-tracked fields (at most 64).
    fn field_count(&self) -> usize {
        0
    }

    /// Write the fields whose bit is set in `mask`, in ascending bit order.
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be encoded.
    fn write_fields(&self, writer: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
        let _ = (writer, mask);
        Ok(())
    }

    /// Read the fields whose bit is set in `mask`, in ascending bit order.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input.
    fn read_fields(
        &mut self,
        reader: &mut NetworkReader<'_>,
        mask: DirtyBits,
    ) -> Result<(), WireError> {
        let _ = (reader, mask);
        Ok(())
    }

    /// Nested delta-synchronized collections, in a stable order.
    fn sync_objects(&self) -> Vec<&dyn SyncObject> {
        Vec::new()
    }

    fn sync_objects_mut(&mut self) -> Vec<&mut dyn SyncObject> {
        Vec::new()
    }

    /// Custom interest management. Return `true` to take over the entity's
    /// observer set; the first component that does so wins.
    fn rebuild_observers(
        &self,
        pose: &Pose,
        candidates: &[ObserverCandidate],
        observers: &mut BTreeSet<ConnectionId>,
        initial: bool,
    ) -> bool {
        let _ = (pose, candidates, observers, initial);
        false
    }

    /// Visibility check for a single newly ready connection. `None` means no
    /// opinion.
    fn check_observer(&self, pose: &Pose, candidate: &ObserverCandidate) -> Option<bool> {
        let _ = (pose, candidate);
        None
    }

    fn on_start_server(&mut self) {}

    fn on_stop_server(&mut self) {}

    fn on_start_client(&mut self) {}

    fn on_stop_client(&mut self) {}

    /// The local peer gained or lost authority over the owning entity.
    fn on_authority_changed(&mut self, has_authority: bool) {
        let _ = has_authority;
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Returns `true` if `component` has something to send and its send interval
/// has elapsed.
#[must_use]
pub fn is_dirty(component: &dyn Replicated, now: Instant) -> bool {
    let state = component.sync_state();
    let changed = !state.dirty().is_empty() || component.sync_objects().iter().any(|o| o.is_dirty());
    changed && state.interval_elapsed(now)
}

/// Write one component's payload.
///
/// # Errors
///
/// Propagates the component's field or collection encoding error.
pub fn serialize_component(
    component: &dyn Replicated,
    writer: &mut NetworkWriter,
    initial: bool,
) -> Result<(), WireError> {
    if initial {
        component.write_fields(writer, DirtyBits::ALL)?;
        for object in component.sync_objects() {
            object.serialize_all(writer)?;
        }
        return Ok(());
    }

    let fields = component.sync_state().dirty();
    writer.write_u64(fields.bits());
    component.write_fields(writer, fields)?;

    let objects = component.sync_objects();
    let mut object_mask = DirtyBits::NONE;
    for (index, object) in objects.iter().enumerate() {
        if object.is_dirty() {
            object_mask.insert(index);
        }
    }
    writer.write_u64(object_mask.bits());
    for index in object_mask.iter() {
        objects[index].serialize_delta(writer)?;
    }
    Ok(())
}

/// Read one component's payload, in the layout [`serialize_component`] wrote.
///
/// # Errors
///
/// Returns an error on malformed input, or if the delta names a sync object
/// this component does not have.
pub fn deserialize_component(
    component: &mut dyn Replicated,
    reader: &mut NetworkReader<'_>,
    initial: bool,
) -> Result<(), WireError> {
    if initial {
        component.read_fields(reader, DirtyBits::ALL)?;
        for object in component.sync_objects_mut() {
            object.deserialize_all(reader)?;
        }
        return Ok(());
    }

    let fields = DirtyBits(reader.read_u64()?);
    component.read_fields(reader, fields)?;

    let object_mask = DirtyBits(reader.read_u64()?);
    let mut objects = component.sync_objects_mut();
    for index in object_mask.iter() {
        let object = objects.get_mut(index).ok_or(WireError::InvalidValue {
            what: "sync object index",
            value: index as u64,
        })?;
        object.deserialize_delta(reader)?;
    }
    Ok(())
}

/// Clear field bits, flush sync objects and restart the send interval.
pub fn clear_dirty(component: &mut dyn Replicated, now: Instant) {
    component.sync_state_mut().clear(now);
    for object in component.sync_objects_mut() {
        object.flush();
    }
}
