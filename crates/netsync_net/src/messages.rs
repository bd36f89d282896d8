//! Protocol message payloads.
//!
//! Each message implements [`NetworkMessage`], which ties the payload to its
//! [`MessageType`] in the catalog. Payloads are plain [`WireCodec`] values;
//! framing is handled by [`crate::frame`].

use bytes::Bytes;
use netsync_component::{AssetId, MethodHash, NetworkId, SceneId};
use netsync_math::Pose;
use netsync_wire::{NetworkReader, NetworkWriter, WireCodec, WireError};

use crate::catalog::MessageType;

/// A payload with a fixed place in the message catalog.
pub trait NetworkMessage: WireCodec {
    /// The tag written in front of this payload.
    const TYPE: MessageType;
}

macro_rules! empty_message {
    ($($(#[$meta:meta])* $name:ident => $ty:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
            pub struct $name;

            impl WireCodec for $name {
                fn encode(&self, _writer: &mut NetworkWriter) -> Result<(), WireError> {
                    Ok(())
                }

                fn decode(_reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
                    Ok(Self)
                }
            }

            impl NetworkMessage for $name {
                const TYPE: MessageType = MessageType::$ty;
            }
        )*
    };
}

empty_message! {
    /// Client → server: start sending me spawn and state traffic.
    ReadyMessage => READY;
    /// Server → client: stop expecting spawn and state traffic.
    NotReadyMessage => NOT_READY;
    /// Client → server: create my player object.
    AddPlayerMessage => ADD_PLAYER;
    /// Client → server: destroy my player object.
    RemovePlayerMessage => REMOVE_PLAYER;
    /// Server → client: the initial spawn batch after `Ready` is complete.
    SpawnFinishedMessage => SPAWN_FINISHED;
    /// Either side: the peer is about to close the connection.
    DisconnectMessage => DISCONNECT;
}

/// Server → client: the connection was refused or is being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub reason: String,
}

impl WireCodec for ErrorMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_str(&self.reason);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            reason: reader.read_str()?.to_owned(),
        })
    }
}

impl NetworkMessage for ErrorMessage {
    const TYPE: MessageType = MessageType::ERROR;
}

/// Server → client: instantiate an entity from a registered template.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnPrefabMessage {
    pub net_id: NetworkId,
    /// The receiving connection owns this entity as its player object.
    pub is_owner: bool,
    /// The receiving connection holds authority.
    pub has_authority: bool,
    pub asset_id: AssetId,
    pub pose: Pose,
    /// Initial entity payload.
    pub payload: Bytes,
}

impl WireCodec for SpawnPrefabMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write(&self.net_id)?;
        writer.write_bool(self.is_owner);
        writer.write_bool(self.has_authority);
        writer.write_uuid(&self.asset_id);
        writer.write(&self.pose)?;
        writer.write_bytes(&self.payload);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            net_id: reader.read()?,
            is_owner: reader.read_bool()?,
            has_authority: reader.read_bool()?,
            asset_id: reader.read_uuid()?,
            pose: reader.read()?,
            payload: Bytes::copy_from_slice(reader.read_bytes()?),
        })
    }
}

impl NetworkMessage for SpawnPrefabMessage {
    const TYPE: MessageType = MessageType::SPAWN_PREFAB;
}

/// Server → client: activate a pre-placed scene object.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSceneObjectMessage {
    pub net_id: NetworkId,
    pub is_owner: bool,
    pub has_authority: bool,
    pub scene_id: SceneId,
    pub pose: Pose,
    pub payload: Bytes,
}

impl WireCodec for SpawnSceneObjectMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write(&self.net_id)?;
        writer.write_bool(self.is_owner);
        writer.write_bool(self.has_authority);
        writer.write(&self.scene_id)?;
        writer.write(&self.pose)?;
        writer.write_bytes(&self.payload);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            net_id: reader.read()?,
            is_owner: reader.read_bool()?,
            has_authority: reader.read_bool()?,
            scene_id: reader.read()?,
            pose: reader.read()?,
            payload: Bytes::copy_from_slice(reader.read_bytes()?),
        })
    }
}

impl NetworkMessage for SpawnSceneObjectMessage {
    const TYPE: MessageType = MessageType::SPAWN_SCENE_OBJECT;
}

macro_rules! net_id_message {
    ($($(#[$meta:meta])* $name:ident => $ty:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name {
                pub net_id: NetworkId,
            }

            impl WireCodec for $name {
                fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
                    writer.write(&self.net_id)
                }

                fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
                    Ok(Self { net_id: reader.read()? })
                }
            }

            impl NetworkMessage for $name {
                const TYPE: MessageType = MessageType::$ty;
            }
        )*
    };
}

net_id_message! {
    /// Server → client: the entity is gone.
    ObjectDestroyMessage => OBJECT_DESTROY;
    /// Server → client: the entity left this connection's interest set.
    ObjectHideMessage => OBJECT_HIDE;
    /// Server → client: this entity is your player object.
    OwnerMessage => OWNER;
}

/// Server → client: authority over an entity was granted or revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityMessage {
    pub net_id: NetworkId,
    pub has_authority: bool,
}

impl WireCodec for AuthorityMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write(&self.net_id)?;
        writer.write_bool(self.has_authority);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            net_id: reader.read()?,
            has_authority: reader.read_bool()?,
        })
    }
}

impl NetworkMessage for AuthorityMessage {
    const TYPE: MessageType = MessageType::AUTHORITY;
}

/// Server → client: delta state of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateVarsMessage {
    pub net_id: NetworkId,
    pub payload: Bytes,
}

impl WireCodec for UpdateVarsMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write(&self.net_id)?;
        writer.write_bytes(&self.payload);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            net_id: reader.read()?,
            payload: Bytes::copy_from_slice(reader.read_bytes()?),
        })
    }
}

impl NetworkMessage for UpdateVarsMessage {
    const TYPE: MessageType = MessageType::UPDATE_VARS;
}

/// Addressing and arguments of one remote invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub net_id: NetworkId,
    /// Index of the target component inside the entity.
    pub component_index: usize,
    pub method: MethodHash,
    /// Encoded arguments.
    pub payload: Bytes,
}

impl WireCodec for RemoteCall {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write(&self.net_id)?;
        writer.write_usize(self.component_index);
        writer.write(&self.method)?;
        writer.write_bytes(&self.payload);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            net_id: reader.read()?,
            component_index: reader.read_usize()?,
            method: reader.read()?,
            payload: Bytes::copy_from_slice(reader.read_bytes()?),
        })
    }
}

macro_rules! call_message {
    ($($(#[$meta:meta])* $name:ident => $ty:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name(pub RemoteCall);

            impl WireCodec for $name {
                fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
                    self.0.encode(writer)
                }

                fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
                    Ok(Self(RemoteCall::decode(reader)?))
                }
            }

            impl NetworkMessage for $name {
                const TYPE: MessageType = MessageType::$ty;
            }
        )*
    };
}

call_message! {
    /// Server → client remote procedure call.
    RpcMessage => RPC;
    /// Client → server authority-checked invocation.
    CommandMessage => COMMAND;
    /// Server → client event notification.
    SyncEventMessage => SYNC_EVENT;
}

/// Client → server round-trip measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingMessage {
    /// Client clock, seconds.
    pub client_time: f64,
}

impl WireCodec for PingMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_f64(self.client_time);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            client_time: reader.read_f64()?,
        })
    }
}

impl NetworkMessage for PingMessage {
    const TYPE: MessageType = MessageType::PING;
}

/// Server → client answer to [`PingMessage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PongMessage {
    /// Echo of the ping's client clock.
    pub client_time: f64,
    /// Server clock when answering, seconds.
    pub server_time: f64,
}

impl WireCodec for PongMessage {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        writer.write_f64(self.client_time);
        writer.write_f64(self.server_time);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            client_time: reader.read_f64()?,
            server_time: reader.read_f64()?,
        })
    }
}

impl NetworkMessage for PongMessage {
    const TYPE: MessageType = MessageType::PONG;
}
