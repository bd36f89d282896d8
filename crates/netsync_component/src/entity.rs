//! The replicated entity: identity, authority, observers and its ordered
//! list of [`Replicated`] components.
//!
//! ## Entity payload layout
//!
//! ```text
//! varint(component mask) || for each set bit i: varint(len_i) || payload_i
//! ```
//!
//! Every component payload is length-prefixed and decoded through a bounded
//! sub-reader, so a component whose codec misbehaves is skipped without
//! disturbing its siblings.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use netsync_math::Pose;
use netsync_wire::{NetworkReader, NetworkWriter, WireError};
use tracing::{error, warn};

use crate::component::{
    ObserverCandidate, Replicated, clear_dirty, deserialize_component, is_dirty,
    serialize_component,
};
use crate::dirty::{DirtyBits, MAX_DIRTY_BITS};
use crate::error::ComponentError;
use crate::id::{AssetId, ConnectionId, NetworkId, SceneId};

/// Maximum number of components on one entity.
pub const MAX_COMPONENTS: usize = MAX_DIRTY_BITS;

/// How remote peers reconstruct an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityOrigin {
    /// Instantiated from a registered template.
    Prefab(AssetId),
    /// Pre-placed in a scene and activated in place.
    Scene(SceneId),
}

impl EntityOrigin {
    /// Returns `true` for pre-placed scene objects.
    #[must_use]
    pub const fn is_scene(&self) -> bool {
        matches!(self, Self::Scene(_))
    }
}

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityState {
    /// Not network-visible yet; the id is [`NetworkId::INVALID`].
    #[default]
    Pending,
    /// Id assigned and registered.
    Active,
    /// Runtime state cleared; a scene object may be spawned again.
    Reset,
}

/// Who besides the server may mutate an entity and issue trusted commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Authority {
    /// Only the server.
    #[default]
    Server,
    /// Implied by player ownership.
    Player(ConnectionId),
    /// Explicitly assigned.
    Granted(ConnectionId),
}

impl Authority {
    /// The connection holding authority, if any.
    #[must_use]
    pub const fn holder(&self) -> Option<ConnectionId> {
        match self {
            Self::Server => None,
            Self::Player(conn) | Self::Granted(conn) => Some(*conn),
        }
    }
}

/// A component that failed to decode inside an otherwise valid payload.
#[derive(Debug)]
pub struct ComponentFailure {
    /// Index of the component in the entity.
    pub index: usize,
    /// Type name of the component, or `"<unknown>"` for an index the entity
    /// does not have.
    pub component: &'static str,
    pub error: WireError,
}

/// Outcome of [`ReplicatedEntity::deserialize`].
#[derive(Debug, Default)]
pub struct DeserializeReport {
    /// Components that decoded cleanly.
    pub applied: usize,
    /// Components that were skipped.
    pub failed: Vec<ComponentFailure>,
}

impl DeserializeReport {
    /// Returns `true` if every component in the payload decoded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One replicated object.
pub struct ReplicatedEntity {
    id: NetworkId,
    origin: EntityOrigin,
    /// Spawn pose. Sent with spawn messages.
    pub pose: Pose,
    state: EntityState,
    authority: Authority,
    player_owner: Option<ConnectionId>,
    observers: BTreeSet<ConnectionId>,
    components: Vec<Box<dyn Replicated>>,
    has_authority: bool,
    is_local_player: bool,
}

impl ReplicatedEntity {
    /// A pending entity with no components.
    #[must_use]
    pub fn new(origin: EntityOrigin) -> Self {
        Self {
            id: NetworkId::INVALID,
            origin,
            pose: Pose::IDENTITY,
            state: EntityState::Pending,
            authority: Authority::Server,
            player_owner: None,
            observers: BTreeSet::new(),
            components: Vec::new(),
            has_authority: false,
            is_local_player: false,
        }
    }

    /// A pending prefab instance.
    #[must_use]
    pub fn prefab(asset: AssetId) -> Self {
        Self::new(EntityOrigin::Prefab(asset))
    }

    /// A pending scene object.
    #[must_use]
    pub fn scene(scene: SceneId) -> Self {
        Self::new(EntityOrigin::Scene(scene))
    }

    #[must_use]
    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    /// Builder form of [`ReplicatedEntity::add_component`].
    ///
    /// # Errors
    ///
    /// See [`ReplicatedEntity::add_component`].
    pub fn with_component<C: Replicated>(mut self, component: C) -> Result<Self, ComponentError> {
        self.add_component(Box::new(component))?;
        Ok(self)
    }

    /// Append a component and return its index.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is full, or if the component tracks
    /// more fields or sync objects than fit in a dirty mask.
    pub fn add_component(&mut self, component: Box<dyn Replicated>) -> Result<usize, ComponentError> {
        let name = component.type_name();
        if self.components.len() >= MAX_COMPONENTS {
            return Err(ComponentError::TooManyComponents { component: name });
        }
        let fields = component.field_count();
        if fields > MAX_DIRTY_BITS {
            return Err(ComponentError::TooManyFields {
                component: name,
                count: fields,
            });
        }
        let objects = component.sync_objects().len();
        if objects > MAX_DIRTY_BITS {
            return Err(ComponentError::TooManySyncObjects {
                component: name,
                count: objects,
            });
        }
        self.components.push(component);
        Ok(self.components.len() - 1)
    }

    #[must_use]
    pub fn id(&self) -> NetworkId {
        self.id
    }

    #[must_use]
    pub fn origin(&self) -> EntityOrigin {
        self.origin
    }

    /// Template id, for prefab instances.
    #[must_use]
    pub fn asset_id(&self) -> Option<AssetId> {
        match self.origin {
            EntityOrigin::Prefab(asset) => Some(asset),
            EntityOrigin::Scene(_) => None,
        }
    }

    /// Scene id, for scene objects.
    #[must_use]
    pub fn scene_id(&self) -> Option<SceneId> {
        match self.origin {
            EntityOrigin::Scene(scene) => Some(scene),
            EntityOrigin::Prefab(_) => None,
        }
    }

    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }

    /// Server-side authority record.
    #[must_use]
    pub fn authority(&self) -> Authority {
        self.authority
    }

    /// Record a new authority. Callers are responsible for notifying peers.
    pub fn set_authority(&mut self, authority: Authority) {
        self.authority = authority;
    }

    /// The connection that owns this entity as its player object.
    #[must_use]
    pub fn player_owner(&self) -> Option<ConnectionId> {
        self.player_owner
    }

    pub fn set_player_owner(&mut self, owner: Option<ConnectionId>) {
        self.player_owner = owner;
    }

    /// Returns `true` if `sender` may issue authority-checked commands.
    #[must_use]
    pub fn accepts_commands_from(&self, sender: ConnectionId) -> bool {
        self.authority.holder() == Some(sender)
    }

    #[must_use]
    pub fn observers(&self) -> &BTreeSet<ConnectionId> {
        &self.observers
    }

    #[must_use]
    pub fn is_observed_by(&self, conn: ConnectionId) -> bool {
        self.observers.contains(&conn)
    }

    /// Returns `true` if `conn` was not observing yet.
    pub fn add_observer(&mut self, conn: ConnectionId) -> bool {
        self.observers.insert(conn)
    }

    /// Returns `true` if `conn` was observing. Removing twice is a no-op.
    pub fn remove_observer(&mut self, conn: ConnectionId) -> bool {
        self.observers.remove(&conn)
    }

    /// Drop every observer and return the previous set.
    pub fn take_observers(&mut self) -> BTreeSet<ConnectionId> {
        std::mem::take(&mut self.observers)
    }

    /// Client side: whether the local peer controls this entity.
    #[must_use]
    pub fn has_authority(&self) -> bool {
        self.has_authority
    }

    /// Client side: update local authority and fire hooks on change.
    pub fn set_has_authority(&mut self, has_authority: bool) {
        if self.has_authority == has_authority {
            return;
        }
        self.has_authority = has_authority;
        for component in &mut self.components {
            component.on_authority_changed(has_authority);
        }
    }

    /// Client side: whether this is the local connection's player object.
    #[must_use]
    pub fn is_local_player(&self) -> bool {
        self.is_local_player
    }

    pub fn set_local_player(&mut self, is_local_player: bool) {
        self.is_local_player = is_local_player;
    }

    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn component(&self, index: usize) -> Option<&dyn Replicated> {
        self.components.get(index).map(|c| c.as_ref())
    }

    pub fn component_mut(&mut self, index: usize) -> Option<&mut (dyn Replicated + 'static)> {
        self.components.get_mut(index).map(|c| c.as_mut())
    }

    /// First component of concrete type `C`.
    #[must_use]
    pub fn get<C: Replicated>(&self) -> Option<&C> {
        self.components
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<C>())
    }

    /// First component of concrete type `C`, mutably.
    pub fn get_mut<C: Replicated>(&mut self) -> Option<&mut C> {
        self.components
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<C>())
    }

    /// Index of the first component of concrete type `C`.
    #[must_use]
    pub fn index_of<C: Replicated>(&self) -> Option<usize> {
        self.components.iter().position(|c| c.as_any().is::<C>())
    }

    /// Make the entity network-visible under `id`.
    pub fn activate(&mut self, id: NetworkId) {
        self.id = id;
        self.state = EntityState::Active;
    }

    /// Clear every runtime field so a scene object can be activated again.
    pub fn reset(&mut self) {
        self.id = NetworkId::INVALID;
        self.state = EntityState::Reset;
        self.authority = Authority::Server;
        self.player_owner = None;
        self.observers.clear();
        self.has_authority = false;
        self.is_local_player = false;
        for component in &mut self.components {
            component.sync_state_mut().reset();
            for object in component.sync_objects_mut() {
                object.reset();
            }
        }
    }

    /// Give every component without its own interval the default one.
    pub fn apply_send_interval(&mut self, interval: Duration) {
        for component in &mut self.components {
            component.sync_state_mut().apply_default_interval(interval);
        }
    }

    pub fn start_server(&mut self) {
        self.components.iter_mut().for_each(|c| c.on_start_server());
    }

    pub fn stop_server(&mut self) {
        self.components.iter_mut().for_each(|c| c.on_stop_server());
    }

    pub fn start_client(&mut self) {
        self.components.iter_mut().for_each(|c| c.on_start_client());
    }

    pub fn stop_client(&mut self) {
        self.components.iter_mut().for_each(|c| c.on_stop_client());
    }

    /// Returns `true` if any component has a delta due at `now`.
    #[must_use]
    pub fn is_dirty(&self, now: Instant) -> bool {
        self.components.iter().any(|c| is_dirty(c.as_ref(), now))
    }

    /// Ask the components for a custom observer set. The first component that
    /// takes over decides; `None` means the default policy applies.
    #[must_use]
    pub fn custom_observers(
        &self,
        candidates: &[ObserverCandidate],
        initial: bool,
    ) -> Option<BTreeSet<ConnectionId>> {
        let mut observers = BTreeSet::new();
        for component in &self.components {
            if component.rebuild_observers(&self.pose, candidates, &mut observers, initial) {
                return Some(observers);
            }
            observers.clear();
        }
        None
    }

    /// Whether a newly ready connection should see this entity.
    ///
    /// A component's single-candidate check answers first. Failing that, a
    /// component with custom visibility decides over just this candidate;
    /// only without either does the connection see the entity by default.
    #[must_use]
    pub fn check_observer(&self, candidate: &ObserverCandidate) -> bool {
        if let Some(visible) = self
            .components
            .iter()
            .find_map(|c| c.check_observer(&self.pose, candidate))
        {
            return visible;
        }
        self.custom_observers(std::slice::from_ref(candidate), false)
            .is_none_or(|observers| observers.contains(&candidate.connection))
    }

    /// Write the full state of every component.
    pub fn serialize_initial(&self, writer: &mut NetworkWriter) {
        let mask = DirtyBits::first(self.components.len());
        writer.write_u64(mask.bits());
        let mut scratch = NetworkWriter::new();
        for component in &self.components {
            self.write_isolated(component.as_ref(), &mut scratch, writer, true);
        }
    }

    /// Write the components with a delta due at `now` and clear them.
    ///
    /// A component that fails to serialize stays dirty, so its pending
    /// changes go out with a later delta. Returns the mask that was
    /// written; an empty mask means nothing changed.
    pub fn serialize_delta(&mut self, writer: &mut NetworkWriter, now: Instant) -> DirtyBits {
        let mut mask = DirtyBits::NONE;
        for (index, component) in self.components.iter().enumerate() {
            if is_dirty(component.as_ref(), now) {
                mask.insert(index);
            }
        }
        writer.write_u64(mask.bits());
        let mut scratch = NetworkWriter::new();
        let mut written = DirtyBits::NONE;
        for index in mask.iter() {
            if self.write_isolated(self.components[index].as_ref(), &mut scratch, writer, false) {
                written.insert(index);
            }
        }
        for index in written.iter() {
            clear_dirty(self.components[index].as_mut(), now);
        }
        mask
    }

    /// Clear every component's pending state without writing it.
    pub fn clear_dirty(&mut self, now: Instant) {
        for component in &mut self.components {
            clear_dirty(component.as_mut(), now);
        }
    }

    fn write_isolated(
        &self,
        component: &dyn Replicated,
        scratch: &mut NetworkWriter,
        writer: &mut NetworkWriter,
        initial: bool,
    ) -> bool {
        scratch.clear();
        let written = match serialize_component(component, scratch, initial) {
            Ok(()) => true,
            Err(err) => {
                error!(
                    net_id = %self.id,
                    component = component.type_name(),
                    error = %err,
                    "component serialization failed; sending empty payload"
                );
                scratch.clear();
                false
            }
        };
        writer.write_bytes(scratch.as_slice());
        written
    }

    /// Apply a payload written by [`ReplicatedEntity::serialize_initial`] or
    /// [`ReplicatedEntity::serialize_delta`].
    ///
    /// Component failures are logged and reported; siblings still apply.
    ///
    /// # Errors
    ///
    /// Returns an error only if the envelope itself (mask or length prefix)
    /// is malformed.
    pub fn deserialize(
        &mut self,
        reader: &mut NetworkReader<'_>,
        initial: bool,
    ) -> Result<DeserializeReport, WireError> {
        let mask = DirtyBits(reader.read_u64()?);
        let mut report = DeserializeReport::default();
        for index in mask.iter() {
            let len = reader.read_usize()?;
            let mut sub = reader.sub_reader(len)?;
            let Some(component) = self.components.get_mut(index) else {
                warn!(net_id = %self.id, index, "payload names a missing component; skipped");
                report.failed.push(ComponentFailure {
                    index,
                    component: "<unknown>",
                    error: WireError::InvalidValue {
                        what: "component index",
                        value: index as u64,
                    },
                });
                continue;
            };
            let result = deserialize_component(component.as_mut(), &mut sub, initial)
                .and_then(|()| sub.finish());
            match result {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    error!(
                        net_id = %self.id,
                        component = component.type_name(),
                        index,
                        error = %err,
                        "component deserialization failed; skipped"
                    );
                    report.failed.push(ComponentFailure {
                        index,
                        component: component.type_name(),
                        error: err,
                    });
                }
            }
        }
        Ok(report)
    }
}

impl std::fmt::Debug for ReplicatedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedEntity")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .field("authority", &self.authority)
            .field("player_owner", &self.player_owner)
            .field("observers", &self.observers)
            .field(
                "components",
                &self.components.iter().map(|c| c.type_name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::cell::Cell;

    use super::*;
    use crate::component::SyncState;
    use crate::sync_list::SyncList;
    use crate::sync_object::SyncObject;

    #[derive(Debug, Default)]
    struct Counter {
        sync: SyncState,
        value: u32,
    }

    impl Replicated for Counter {
        fn type_name(&self) -> &'static str {
            "Counter"
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

        fn field_count(&self) -> usize {
            1
        }

        fn write_fields(&self, w: &mut NetworkWriter, mask: DirtyBits) -> Result<(), WireError> {
            if mask.contains(0) {
                w.write_u32(self.value);
            }
            Ok(())
        }

        fn read_fields(&mut self, r: &mut NetworkReader<'_>, mask: DirtyBits) -> Result<(), WireError> {
            if mask.contains(0) {
                self.value = r.read_u32()?;
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Reads one byte too many on the receiving side.
    #[derive(Debug, Default)]
    struct Greedy {
        sync: SyncState,
    }

    impl Replicated for Greedy {
        fn type_name(&self) -> &'static str {
            "Greedy"
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

        fn field_count(&self) -> usize {
            1
        }

        fn write_fields(&self, w: &mut NetworkWriter, _mask: DirtyBits) -> Result<(), WireError> {
            w.write_u8(7);
            Ok(())
        }

        fn read_fields(&mut self, r: &mut NetworkReader<'_>, _mask: DirtyBits) -> Result<(), WireError> {
            r.read_u8()?;
            r.read_u8()?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[derive(Debug, Default)]
    struct Wide {
        sync: SyncState,
    }

    impl Replicated for Wide {
        fn type_name(&self) -> &'static str {
            "Wide"
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

        fn field_count(&self) -> usize {
            65
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Only sees connections with an even id.
    #[derive(Debug, Default)]
    struct EvenOnly {
        sync: SyncState,
    }

    impl Replicated for EvenOnly {
        fn type_name(&self) -> &'static str {
            "EvenOnly"
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

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
                    .filter(|c| c.0 % 2 == 0),
            );
            true
        }

        fn check_observer(&self, _pose: &Pose, candidate: &ObserverCandidate) -> Option<bool> {
            Some(candidate.connection.0 % 2 == 0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Custom visibility through `rebuild_observers` alone; admits nobody.
    #[derive(Debug, Default)]
    struct Sealed {
        sync: SyncState,
    }

    impl Replicated for Sealed {
        fn type_name(&self) -> &'static str {
            "Sealed"
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

        fn rebuild_observers(
            &self,
            _pose: &Pose,
            _candidates: &[ObserverCandidate],
            _observers: &mut BTreeSet<ConnectionId>,
            _initial: bool,
        ) -> bool {
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// A list whose field writer fails while `fail` is set.
    #[derive(Default)]
    struct Flaky {
        sync: SyncState,
        fail: Cell<bool>,
        list: SyncList<u32>,
    }

    impl Replicated for Flaky {
        fn type_name(&self) -> &'static str {
            "Flaky"
        }

        fn sync_state(&self) -> &SyncState {
            &self.sync
        }

        fn sync_state_mut(&mut self) -> &mut SyncState {
            &mut self.sync
        }

        fn write_fields(&self, _w: &mut NetworkWriter, _mask: DirtyBits) -> Result<(), WireError> {
            if self.fail.replace(false) {
                return Err(WireError::custom("flaky writer"));
            }
            Ok(())
        }

        fn sync_objects(&self) -> Vec<&dyn SyncObject> {
            vec![&self.list as &dyn SyncObject]
        }

        fn sync_objects_mut(&mut self) -> Vec<&mut dyn SyncObject> {
            vec![&mut self.list as &mut dyn SyncObject]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn counter(value: u32) -> Counter {
        Counter {
            value,
            ..Counter::default()
        }
    }

    fn entity_with(components: Vec<Box<dyn Replicated>>) -> ReplicatedEntity {
        let mut entity = ReplicatedEntity::scene(SceneId(9));
        for component in components {
            entity.add_component(component).unwrap();
        }
        entity.activate(NetworkId(1));
        entity
    }

    #[test]
    fn test_new_entity_is_pending() {
        let entity = ReplicatedEntity::prefab(AssetId::nil());
        assert_eq!(entity.id(), NetworkId::INVALID);
        assert_eq!(entity.state(), EntityState::Pending);
        assert_eq!(entity.asset_id(), Some(AssetId::nil()));
        assert_eq!(entity.scene_id(), None);
        assert_eq!(entity.authority(), Authority::Server);
    }

    #[test]
    fn test_component_limits() {
        let mut entity = ReplicatedEntity::scene(SceneId(1));
        assert!(matches!(
            entity.add_component(Box::new(Wide::default())),
            Err(ComponentError::TooManyFields { count: 65, .. })
        ));
        for _ in 0..MAX_COMPONENTS {
            entity.add_component(Box::new(Counter::default())).unwrap();
        }
        assert!(matches!(
            entity.add_component(Box::new(Counter::default())),
            Err(ComponentError::TooManyComponents { .. })
        ));
    }

    #[test]
    fn test_typed_lookup() {
        let entity = ReplicatedEntity::scene(SceneId(1))
            .with_component(EvenOnly::default())
            .unwrap()
            .with_component(counter(4))
            .unwrap();
        assert_eq!(entity.index_of::<Counter>(), Some(1));
        assert_eq!(entity.get::<Counter>().map(|c| c.value), Some(4));
        assert!(entity.get::<Greedy>().is_none());
    }

    #[test]
    fn test_initial_payload_round_trip() {
        let source = entity_with(vec![Box::new(counter(3)), Box::new(counter(5))]);
        let mut writer = NetworkWriter::new();
        source.serialize_initial(&mut writer);

        let mut mirror = entity_with(vec![Box::new(counter(0)), Box::new(counter(0))]);
        let mut reader = NetworkReader::new(writer.as_slice());
        let report = mirror.deserialize(&mut reader, true).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.applied, 2);
        assert_eq!(mirror.component(1).and_then(|c| c.as_any().downcast_ref::<Counter>()).map(|c| c.value), Some(5));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_delta_only_includes_dirty_components_and_clears() {
        let now = Instant::now();
        let mut entity = entity_with(vec![Box::new(counter(0)), Box::new(counter(0))]);
        {
            let c = entity.component_mut(1).unwrap().as_any_mut().downcast_mut::<Counter>().unwrap();
            c.sync.set(0, &mut c.value, 42);
        }
        assert!(entity.is_dirty(now));

        let mut first = NetworkWriter::new();
        assert_eq!(entity.serialize_delta(&mut first, now), DirtyBits(0b10));
        assert!(!entity.is_dirty(now));

        let mut second = NetworkWriter::new();
        assert_eq!(entity.serialize_delta(&mut second, now), DirtyBits::NONE);
        assert_eq!(second.as_slice(), &[0]);

        let mut mirror = entity_with(vec![Box::new(counter(0)), Box::new(counter(0))]);
        let mut reader = NetworkReader::new(first.as_slice());
        mirror.deserialize(&mut reader, false).unwrap();
        assert_eq!(mirror.get_mut::<Counter>().map(|c| c.value), Some(0));
        assert_eq!(
            mirror.component(1).and_then(|c| c.as_any().downcast_ref::<Counter>()).map(|c| c.value),
            Some(42)
        );
    }

    #[test]
    fn test_failing_component_is_isolated() {
        let source = entity_with(vec![
            Box::new(counter(1)),
            Box::new(Greedy::default()),
            Box::new(counter(3)),
        ]);
        let mut writer = NetworkWriter::new();
        source.serialize_initial(&mut writer);

        let mut mirror = entity_with(vec![
            Box::new(counter(0)),
            Box::new(Greedy::default()),
            Box::new(counter(0)),
        ]);
        let mut reader = NetworkReader::new(writer.as_slice());
        let report = mirror.deserialize(&mut reader, true).unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 1);
        assert_eq!(report.failed[0].component, "Greedy");
        let values: Vec<u32> = [0, 2]
            .iter()
            .filter_map(|&i| mirror.component(i))
            .filter_map(|c| c.as_any().downcast_ref::<Counter>())
            .map(|c| c.value)
            .collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn test_unknown_component_index_is_skipped() {
        let source = entity_with(vec![Box::new(counter(1)), Box::new(counter(2))]);
        let mut writer = NetworkWriter::new();
        source.serialize_initial(&mut writer);

        let mut mirror = entity_with(vec![Box::new(counter(0))]);
        let mut reader = NetworkReader::new(writer.as_slice());
        let report = mirror.deserialize(&mut reader, true).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed[0].component, "<unknown>");
    }

    #[test]
    fn test_truncated_envelope_is_an_error() {
        let source = entity_with(vec![Box::new(counter(300))]);
        let mut writer = NetworkWriter::new();
        source.serialize_initial(&mut writer);
        let bytes = writer.as_slice();

        let mut mirror = entity_with(vec![Box::new(counter(0))]);
        let mut reader = NetworkReader::new(&bytes[..bytes.len() - 1]);
        assert!(mirror.deserialize(&mut reader, true).is_err());
    }

    #[test]
    fn test_command_permission() {
        let mut entity = entity_with(vec![]);
        entity.set_player_owner(Some(ConnectionId(1)));
        assert!(!entity.accepts_commands_from(ConnectionId(1)));
        entity.set_authority(Authority::Player(ConnectionId(1)));
        assert!(entity.accepts_commands_from(ConnectionId(1)));
        entity.set_authority(Authority::Granted(ConnectionId(2)));
        assert!(entity.accepts_commands_from(ConnectionId(2)));
        assert!(!entity.accepts_commands_from(ConnectionId(1)));
    }

    #[test]
    fn test_custom_observers_first_component_wins() {
        let entity = entity_with(vec![Box::new(counter(0)), Box::new(EvenOnly::default())]);
        let candidates: Vec<_> = (1..=4)
            .map(|i| ObserverCandidate {
                connection: ConnectionId(i),
                player_pose: None,
            })
            .collect();
        let observers = entity.custom_observers(&candidates, true).unwrap();
        assert_eq!(observers.into_iter().collect::<Vec<_>>(), vec![ConnectionId(2), ConnectionId(4)]);
        assert!(!entity.check_observer(&candidates[0]));

        let plain = entity_with(vec![Box::new(counter(0))]);
        assert!(plain.custom_observers(&candidates, true).is_none());
        assert!(plain.check_observer(&candidates[0]));
    }

    #[test]
    fn test_rebuild_only_visibility_gates_ready_check() {
        let sealed = entity_with(vec![Box::new(counter(0)), Box::new(Sealed::default())]);
        let candidate = ObserverCandidate {
            connection: ConnectionId(2),
            player_pose: None,
        };
        assert!(!sealed.check_observer(&candidate));
        assert!(sealed.custom_observers(&[candidate], false).unwrap().is_empty());
    }

    #[test]
    fn test_failed_delta_keeps_pending_list_changes() {
        let now = Instant::now();
        let mut entity = entity_with(vec![Box::new(counter(0)), Box::new(Flaky::default())]);
        let mut mirror = entity_with(vec![Box::new(counter(0)), Box::new(Flaky::default())]);
        let mut initial = NetworkWriter::new();
        entity.serialize_initial(&mut initial);
        mirror.deserialize(&mut NetworkReader::new(initial.as_slice()), true).unwrap();

        {
            let flaky = entity.get_mut::<Flaky>().unwrap();
            flaky.list.push(1).unwrap();
            flaky.list.push(2).unwrap();
            flaky.fail.set(true);
        }
        let mut failed = NetworkWriter::new();
        assert_eq!(entity.serialize_delta(&mut failed, now), DirtyBits(0b10));
        assert!(entity.is_dirty(now));
        let report = mirror.deserialize(&mut NetworkReader::new(failed.as_slice()), false).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(mirror.get::<Flaky>().unwrap().list.as_slice().is_empty());

        let mut retried = NetworkWriter::new();
        assert_eq!(entity.serialize_delta(&mut retried, now), DirtyBits(0b10));
        assert!(!entity.is_dirty(now));
        let report = mirror.deserialize(&mut NetworkReader::new(retried.as_slice()), false).unwrap();
        assert!(report.is_clean());
        assert_eq!(mirror.get::<Flaky>().unwrap().list.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_reset_clears_runtime_state() {
        let mut entity = entity_with(vec![Box::new(counter(0))]);
        entity.add_observer(ConnectionId(1));
        entity.set_player_owner(Some(ConnectionId(1)));
        entity.set_authority(Authority::Player(ConnectionId(1)));
        entity.reset();
        assert_eq!(entity.id(), NetworkId::INVALID);
        assert_eq!(entity.state(), EntityState::Reset);
        assert!(entity.observers().is_empty());
        assert_eq!(entity.player_owner(), None);
        assert_eq!(entity.authority(), Authority::Server);
    }

    #[test]
    fn test_observer_removal_is_idempotent() {
        let mut entity = entity_with(vec![]);
        assert!(entity.add_observer(ConnectionId(5)));
        assert!(!entity.add_observer(ConnectionId(5)));
        assert!(entity.remove_observer(ConnectionId(5)));
        assert!(!entity.remove_observer(ConnectionId(5)));
    }
}
