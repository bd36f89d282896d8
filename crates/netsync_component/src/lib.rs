//! # netsync_component
//!
//! What gets replicated, and how its changes are tracked.
//!
//! This crate provides:
//!
//! - [`Replicated`] — the capability every replicated component implements.
//! - [`ReplicatedEntity`] — identity, authority, observers and components of
//!   one replicated object, plus its length-prefixed payload format.
//! - [`DirtyBits`] and [`SyncState`] — 64-bit per-field change tracking gated
//!   by a send interval.
//! - [`SyncList`] — an ordered collection replicated as an operation log.
//! - [`NetworkId`], [`NetworkIdAllocator`], [`ConnectionId`], [`AssetId`],
//!   [`SceneId`], [`ComponentTypeId`] and [`MethodHash`].

pub mod component;
pub mod dirty;
pub mod entity;
pub mod error;
pub mod id;
pub mod sync_list;
pub mod sync_object;

pub use component::{
    ComponentTypeId, DEFAULT_SEND_INTERVAL, MethodHash, ObserverCandidate, Replicated, SyncState,
};
pub use dirty::{DirtyBits, MAX_DIRTY_BITS};
pub use entity::{
    Authority, ComponentFailure, DeserializeReport, EntityOrigin, EntityState, MAX_COMPONENTS,
    ReplicatedEntity,
};
pub use error::ComponentError;
pub use id::{AssetId, ConnectionId, NetworkId, NetworkIdAllocator, SceneId};
pub use sync_list::{Catchup, ListOp, SyncList};
pub use sync_object::SyncObject;
