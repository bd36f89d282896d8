//! The wire message catalog.
//!
//! Every peer must agree on these values bit for bit. Types `0..=47` are
//! reserved for the protocol; application messages start at
//! [`MessageType::FIRST_USER`].

use std::fmt;

/// A message type tag, written as a varint at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub u16);

impl MessageType {
    // ── Entity traffic ──────────────────────────────────────────────────────
    pub const OBJECT_DESTROY: MessageType = MessageType(1);
    pub const RPC: MessageType = MessageType(2);
    pub const SPAWN_PREFAB: MessageType = MessageType(3);
    pub const OWNER: MessageType = MessageType(4);
    pub const COMMAND: MessageType = MessageType(5);
    pub const SYNC_EVENT: MessageType = MessageType(7);
    pub const UPDATE_VARS: MessageType = MessageType(8);
    pub const SPAWN_SCENE_OBJECT: MessageType = MessageType(10);
    pub const SPAWN_FINISHED: MessageType = MessageType(12);
    pub const OBJECT_HIDE: MessageType = MessageType(13);
    pub const AUTHORITY: MessageType = MessageType(15);

    // ── Connection traffic ──────────────────────────────────────────────────
    pub const CONNECT: MessageType = MessageType(32);
    pub const DISCONNECT: MessageType = MessageType(33);
    pub const ERROR: MessageType = MessageType(34);
    pub const READY: MessageType = MessageType(35);
    pub const NOT_READY: MessageType = MessageType(36);
    pub const ADD_PLAYER: MessageType = MessageType(37);
    pub const REMOVE_PLAYER: MessageType = MessageType(38);
    pub const PING: MessageType = MessageType(43);
    pub const PONG: MessageType = MessageType(44);

    /// Last type reserved by the protocol.
    pub const LAST_RESERVED: MessageType = MessageType(47);

    /// First type available to applications.
    pub const FIRST_USER: MessageType = MessageType(48);

    /// Returns `true` if this type belongs to the protocol's reserved range.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 <= Self::LAST_RESERVED.0
    }

    /// Symbolic name for catalog entries.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::OBJECT_DESTROY => "ObjectDestroy",
            Self::RPC => "Rpc",
            Self::SPAWN_PREFAB => "SpawnPrefab",
            Self::OWNER => "Owner",
            Self::COMMAND => "Command",
            Self::SYNC_EVENT => "SyncEvent",
            Self::UPDATE_VARS => "UpdateVars",
            Self::SPAWN_SCENE_OBJECT => "SpawnSceneObject",
            Self::SPAWN_FINISHED => "SpawnFinished",
            Self::OBJECT_HIDE => "ObjectHide",
            Self::AUTHORITY => "Authority",
            Self::CONNECT => "Connect",
            Self::DISCONNECT => "Disconnect",
            Self::ERROR => "Error",
            Self::READY => "Ready",
            Self::NOT_READY => "NotReady",
            Self::ADD_PLAYER => "AddPlayer",
            Self::REMOVE_PLAYER => "RemovePlayer",
            Self::PING => "Ping",
            Self::PONG => "Pong",
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "MessageType({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: [MessageType; 20] = [
        MessageType::OBJECT_DESTROY,
        MessageType::RPC,
        MessageType::SPAWN_PREFAB,
        MessageType::OWNER,
        MessageType::COMMAND,
        MessageType::SYNC_EVENT,
        MessageType::UPDATE_VARS,
        MessageType::SPAWN_SCENE_OBJECT,
        MessageType::SPAWN_FINISHED,
        MessageType::OBJECT_HIDE,
        MessageType::AUTHORITY,
        MessageType::CONNECT,
        MessageType::DISCONNECT,
        MessageType::ERROR,
        MessageType::READY,
        MessageType::NOT_READY,
        MessageType::ADD_PLAYER,
        MessageType::REMOVE_PLAYER,
        MessageType::PING,
        MessageType::PONG,
    ];

    #[test]
    fn test_catalog_values_are_distinct_and_reserved() {
        let mut seen = std::collections::HashSet::new();
        for ty in CATALOG {
            assert!(ty.is_reserved(), "{ty} outside reserved range");
            assert!(ty.name().is_some());
            assert!(seen.insert(ty.0), "duplicate value {}", ty.0);
        }
    }

    #[test]
    fn test_user_range() {
        assert!(!MessageType::FIRST_USER.is_reserved());
        assert_eq!(MessageType(100).name(), None);
        assert_eq!(MessageType::PING.to_string(), "Ping(43)");
    }
}
