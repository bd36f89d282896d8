//! Identifier types and network-id allocation.
//!
//! A [`NetworkId`] is a lightweight `u32` that names one replicated entity on
//! every peer. Ids are allocated by the authority (the server) only; `0` is
//! reserved for entities that are not network-visible yet.

use netsync_wire::{NetworkReader, NetworkWriter, WireCodec, WireError};
use serde::{Deserialize, Serialize};

/// Identifies a replicated entity instance across all peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u32);

impl NetworkId {
    /// The unassigned / local-only sentinel.
    pub const INVALID: NetworkId = NetworkId(0);

    /// Create an id from a raw `u32`.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw `u32` identifier.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` if this id has been assigned (non-zero).
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetworkId({})", self.0)
    }
}

impl WireCodec for NetworkId {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_u32(self.0);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self(reader.read_u32()?))
    }
}

/// Allocates monotonically increasing network ids.
///
/// One allocator lives in each server-side replication context. Ids are not
/// recycled while the context lives; [`NetworkIdAllocator::reset`] is called
/// when the server stops.
#[derive(Debug)]
pub struct NetworkIdAllocator {
    next_id: u32,
}

impl NetworkIdAllocator {
    /// Creates a new allocator. Ids start at 1 (0 is [`NetworkId::INVALID`]).
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocates a fresh id. Skips 0 if the counter ever wraps.
    pub fn allocate(&mut self) -> NetworkId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        NetworkId(id)
    }

    /// Returns the number of ids handed out since the last reset.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.next_id - 1
    }

    /// Restart allocation from 1.
    pub fn reset(&mut self) {
        self.next_id = 1;
    }
}

impl Default for NetworkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies one transport-level peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Stable identifier of the template a dynamically spawned entity is built from.
pub type AssetId = uuid::Uuid;

/// Identifies a pre-placed scene entity that exists on every peer before it
/// is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId(pub u64);

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SceneId({:#x})", self.0)
    }
}

impl WireCodec for SceneId {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_u64(self.0);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self(reader.read_u64()?))
    }
}
