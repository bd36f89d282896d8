//! Replication-layer error types.

use netsync_component::{AssetId, ComponentError, ConnectionId, MethodHash, NetworkId, SceneId};
use netsync_net::{NetError, TransportError};
use netsync_wire::WireError;

use crate::rpc::CallKind;

/// Errors raised by server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The entity already has a network id.
    #[error("{0} is already spawned")]
    AlreadySpawned(NetworkId),

    /// No active entity has this id.
    #[error("unknown entity {0}")]
    UnknownEntity(NetworkId),

    /// No open connection has this id.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Authority is explicitly held by another connection.
    #[error("{net_id} authority is held by {holder}; revoke it first")]
    AuthorityHeld {
        net_id: NetworkId,
        holder: ConnectionId,
    },

    /// Revoking authority that nobody holds.
    #[error("{0} has no client authority to revoke")]
    NoAuthority(NetworkId),

    /// No template is registered for the asset.
    #[error("no template registered for asset {0}")]
    UnknownAsset(AssetId),

    /// No dormant scene object has the scene id.
    #[error("no dormant scene object {0}")]
    UnknownScene(SceneId),

    /// `AddPlayer` without a configured player template.
    #[error("no player template configured")]
    NoPlayerTemplate,

    /// The connection already has a player object.
    #[error("{connection} already has player {player}")]
    PlayerExists {
        connection: ConnectionId,
        player: NetworkId,
    },

    /// A server or client operation before `listen`/`connect`.
    #[error("not active")]
    NotActive,

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Reasons a remote invocation was refused.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("unknown entity {0}")]
    UnknownEntity(NetworkId),

    #[error("{net_id} has {count} components; no component at index {index}")]
    ComponentIndex {
        net_id: NetworkId,
        index: usize,
        count: usize,
    },

    #[error("no {kind} registered for method hash {method:?}")]
    UnknownMethod { kind: CallKind, method: MethodHash },

    #[error("{method} is not declared on component {component}")]
    WrongOwner {
        method: &'static str,
        component: &'static str,
    },

    #[error("{sender} has no authority over {net_id}")]
    Unauthorized {
        net_id: NetworkId,
        sender: ConnectionId,
    },

    #[error("{sender} does not observe {net_id}")]
    NotObserving {
        net_id: NetworkId,
        sender: ConnectionId,
    },

    #[error("{method} arguments: {source}")]
    Arguments {
        method: &'static str,
        #[source]
        source: WireError,
    },
}

/// Errors loading a [`crate::ReplicationConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

