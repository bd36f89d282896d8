//! The id → entity table owned by one server or client.

use std::collections::BTreeMap;
use std::collections::btree_map;

use netsync_component::{NetworkId, NetworkIdAllocator, ReplicatedEntity};

/// Registry of active entities plus the id allocator.
///
/// Created when a server starts listening or a client connects, and torn
/// down with [`ReplicationContext::drain`] when it stops.
#[derive(Debug, Default)]
pub struct ReplicationContext {
    entities: BTreeMap<NetworkId, ReplicatedEntity>,
    allocator: NetworkIdAllocator,
}

impl ReplicationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id that is not in use.
    pub fn allocate_id(&mut self) -> NetworkId {
        loop {
            let id = self.allocator.allocate();
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register an active entity under its id. Returns the entity it
    /// replaced, if any.
    pub fn insert(&mut self, entity: ReplicatedEntity) -> Option<ReplicatedEntity> {
        self.entities.insert(entity.id(), entity)
    }

    #[must_use]
    pub fn get(&self, id: NetworkId) -> Option<&ReplicatedEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut ReplicatedEntity> {
        self.entities.get_mut(&id)
    }

    pub fn remove(&mut self, id: NetworkId) -> Option<ReplicatedEntity> {
        self.entities.remove(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NetworkId) -> bool {
        self.entities.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Active ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<NetworkId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> btree_map::Values<'_, NetworkId, ReplicatedEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> btree_map::ValuesMut<'_, NetworkId, ReplicatedEntity> {
        self.entities.values_mut()
    }

    /// Remove every entity and restart id allocation.
    pub fn drain(&mut self) -> Vec<ReplicatedEntity> {
        self.allocator.reset();
        std::mem::take(&mut self.entities).into_values().collect()
    }
}
