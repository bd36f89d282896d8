//! Remote call registry.
//!
//! Commands, RPCs and sync events are dispatched through one table keyed by
//! `(kind, method hash)`. Handlers are registered once at startup, either
//! for a concrete component type (checked by downcast) or for a declared
//! [`ComponentTypeId`] (checked with [`Replicated::is_a`], so components can
//! answer for a base type).

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use netsync_component::{ComponentTypeId, ConnectionId, MethodHash, NetworkId, Replicated, ReplicatedEntity};
use netsync_net::messages::RemoteCall;
use netsync_wire::{NetworkReader, WireError};
use tracing::{debug, warn};

use crate::error::CallError;

/// The three remote call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Client → server, authority-checked.
    Command,
    /// Server → client.
    Rpc,
    /// Server → client notification.
    SyncEvent,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Command => "command",
            Self::Rpc => "rpc",
            Self::SyncEvent => "sync event",
        })
    }
}

/// Who sent a call, handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub kind: CallKind,
    pub net_id: NetworkId,
    /// The sending connection. `None` when the call came from the server.
    pub sender: Option<ConnectionId>,
}

type CallFn = Rc<dyn Fn(&mut dyn Replicated, &CallContext, &mut NetworkReader<'_>) -> Result<(), WireError>>;

#[derive(Clone, Copy)]
enum CallOwner {
    Concrete(TypeId),
    Declared(ComponentTypeId),
}

impl CallOwner {
    fn accepts(self, component: &dyn Replicated) -> bool {
        match self {
            Self::Concrete(ty) => component.as_any().type_id() == ty,
            Self::Declared(ty) => component.is_a(ty),
        }
    }
}

#[derive(Clone)]
struct CallEntry {
    name: &'static str,
    owner: CallOwner,
    requires_authority: bool,
    handler: CallFn,
}

/// Registration-time table of remote call handlers.
#[derive(Clone, Default)]
pub struct RemoteCalls {
    table: HashMap<(CallKind, MethodHash), CallEntry>,
}

impl RemoteCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, kind: CallKind, entry: CallEntry) -> MethodHash {
        let hash = MethodHash::of(entry.name);
        if let Some(previous) = self.table.insert((kind, hash), entry) {
            warn!(%kind, method = previous.name, hash = hash.0, "remote call registration replaced");
        }
        hash
    }

    /// Register a handler on component type `C`.
    pub fn register<C, F>(&mut self, kind: CallKind, method: &'static str, handler: F) -> MethodHash
    where
        C: Replicated,
        F: Fn(&mut C, &CallContext, &mut NetworkReader<'_>) -> Result<(), WireError> + 'static,
    {
        let handler: CallFn = Rc::new(
            move |component: &mut dyn Replicated, ctx: &CallContext, reader: &mut NetworkReader<'_>| {
                match component.as_any_mut().downcast_mut::<C>() {
                    Some(component) => handler(component, ctx, reader),
                    None => Err(WireError::custom("component type changed after owner check")),
                }
            },
        );
        self.insert(
            kind,
            CallEntry {
                name: method,
                owner: CallOwner::Concrete(TypeId::of::<C>()),
                requires_authority: true,
                handler,
            },
        )
    }

    /// Register a handler for every component that `is_a(owner)`.
    pub fn register_dyn<F>(&mut self, kind: CallKind, owner: ComponentTypeId, method: &'static str, handler: F) -> MethodHash
    where
        F: Fn(&mut dyn Replicated, &CallContext, &mut NetworkReader<'_>) -> Result<(), WireError> + 'static,
    {
        self.insert(
            kind,
            CallEntry {
                name: method,
                owner: CallOwner::Declared(owner),
                requires_authority: true,
                handler: Rc::new(handler),
            },
        )
    }

    /// Shorthand for a [`CallKind::Command`] on `C`.
    pub fn command<C, F>(&mut self, method: &'static str, handler: F) -> MethodHash
    where
        C: Replicated,
        F: Fn(&mut C, &CallContext, &mut NetworkReader<'_>) -> Result<(), WireError> + 'static,
    {
        self.register::<C, F>(CallKind::Command, method, handler)
    }

    /// Shorthand for a [`CallKind::Rpc`] on `C`.
    pub fn rpc<C, F>(&mut self, method: &'static str, handler: F) -> MethodHash
    where
        C: Replicated,
        F: Fn(&mut C, &CallContext, &mut NetworkReader<'_>) -> Result<(), WireError> + 'static,
    {
        self.register::<C, F>(CallKind::Rpc, method, handler)
    }

    /// Shorthand for a [`CallKind::SyncEvent`] on `C`.
    pub fn sync_event<C, F>(&mut self, method: &'static str, handler: F) -> MethodHash
    where
        C: Replicated,
        F: Fn(&mut C, &CallContext, &mut NetworkReader<'_>) -> Result<(), WireError> + 'static,
    {
        self.register::<C, F>(CallKind::SyncEvent, method, handler)
    }

    /// Let any observer invoke the command `method`, not only the owner.
    /// Returns `false` if no such command is registered.
    pub fn allow_without_authority(&mut self, method: &str) -> bool {
        match self.table.get_mut(&(CallKind::Command, MethodHash::of(method))) {
            Some(entry) => {
                entry.requires_authority = false;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, kind: CallKind, method: MethodHash) -> bool {
        self.table.contains_key(&(kind, method))
    }

    /// Declared name of a registered method.
    #[must_use]
    pub fn method_name(&self, kind: CallKind, method: MethodHash) -> Option<&'static str> {
        self.table.get(&(kind, method)).map(|entry| entry.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Resolve and run `call` against `entity`.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] for an unknown hash, a bad component index, a
    /// handler registered on another component type, a command from a
    /// connection without authority (or, for exempt commands, one that does
    /// not observe the entity), or malformed arguments. Nothing is mutated
    /// in the first four cases.
    pub fn invoke(
        &self,
        kind: CallKind,
        entity: &mut ReplicatedEntity,
        call: &RemoteCall,
        sender: Option<ConnectionId>,
    ) -> Result<(), CallError> {
        let entry = self
            .table
            .get(&(kind, call.method))
            .ok_or(CallError::UnknownMethod {
                kind,
                method: call.method,
            })?;

        if kind == CallKind::Command
            && entry.requires_authority
            && let Some(sender) = sender
            && !entity.accepts_commands_from(sender)
        {
            return Err(CallError::Unauthorized {
                net_id: entity.id(),
                sender,
            });
        }
        if kind == CallKind::Command
            && !entry.requires_authority
            && let Some(sender) = sender
            && !entity.is_observed_by(sender)
        {
            return Err(CallError::NotObserving {
                net_id: entity.id(),
                sender,
            });
        }

        let net_id = entity.id();
        let count = entity.component_count();
        let component = entity
            .component_mut(call.component_index)
            .ok_or(CallError::ComponentIndex {
                net_id,
                index: call.component_index,
                count,
            })?;
        if !entry.owner.accepts(component) {
            return Err(CallError::WrongOwner {
                method: entry.name,
                component: component.type_name(),
            });
        }

        let ctx = CallContext { kind, net_id, sender };
        let mut reader = NetworkReader::new(&call.payload);
        (entry.handler)(component, &ctx, &mut reader)
            .and_then(|()| reader.finish())
            .map_err(|source| CallError::Arguments {
                method: entry.name,
                source,
            })?;
        debug!(%kind, method = entry.name, %net_id, "remote call invoked");
        Ok(())
    }
}

impl fmt::Debug for RemoteCalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .table
            .iter()
            .map(|((kind, _), entry)| format!("{kind}:{}", entry.name))
            .collect();
        names.sort();
        f.debug_struct("RemoteCalls").field("methods", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use bytes::Bytes;
    use netsync_component::{Authority, SceneId, SyncState};
    use netsync_wire::to_bytes;

    use super::*;

    #[derive(Debug, Default)]
    struct Turret {
        sync: SyncState,
        shots: u32,
    }

    impl Replicated for Turret {
        fn type_name(&self) -> &'static str {
            "Turret"
        }

        fn is_a(&self, ty: ComponentTypeId) -> bool {
            ty == ComponentTypeId::from_name("Turret") || ty == ComponentTypeId::from_name("Weapon")
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
    }

    #[derive(Debug, Default)]
    struct Door {
        sync: SyncState,
    }

    impl Replicated for Door {
        fn type_name(&self) -> &'static str {
            "Door"
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
    }

    fn entity() -> ReplicatedEntity {
        let mut entity = ReplicatedEntity::scene(SceneId(1))
            .with_component(Turret::default())
            .unwrap()
            .with_component(Door::default())
            .unwrap();
        entity.activate(NetworkId(1));
        entity.set_player_owner(Some(ConnectionId(10)));
        entity.set_authority(Authority::Player(ConnectionId(10)));
        entity
    }

    fn calls() -> RemoteCalls {
        let mut calls = RemoteCalls::new();
        calls.command::<Turret, _>("CmdFire", |turret, _ctx, reader| {
            turret.shots += reader.read_u32()?;
            Ok(())
        });
        calls
    }

    fn call(index: usize, method: &str, payload: Bytes) -> RemoteCall {
        RemoteCall {
            net_id: NetworkId(1),
            component_index: index,
            method: MethodHash::of(method),
            payload,
        }
    }

    fn shots(entity: &ReplicatedEntity) -> u32 {
        entity.get::<Turret>().map_or(0, |t| t.shots)
    }

    #[test]
    fn test_owner_command_is_applied() {
        let calls = calls();
        let mut e = entity();
        let payload = to_bytes(&3u32).unwrap();
        calls
            .invoke(CallKind::Command, &mut e, &call(0, "CmdFire", payload), Some(ConnectionId(10)))
            .unwrap();
        assert_eq!(shots(&e), 3);
    }

    #[test]
    fn test_rejections_leave_state_untouched() {
        let calls = calls();
        let mut e = entity();
        let payload = to_bytes(&3u32).unwrap();

        assert!(matches!(
            calls.invoke(CallKind::Command, &mut e, &call(0, "CmdFire", payload.clone()), Some(ConnectionId(11))),
            Err(CallError::Unauthorized { sender: ConnectionId(11), .. })
        ));
        assert!(matches!(
            calls.invoke(CallKind::Command, &mut e, &call(0, "CmdJump", payload.clone()), Some(ConnectionId(10))),
            Err(CallError::UnknownMethod { .. })
        ));
        assert!(matches!(
            calls.invoke(CallKind::Command, &mut e, &call(5, "CmdFire", payload.clone()), Some(ConnectionId(10))),
            Err(CallError::ComponentIndex { index: 5, count: 2, .. })
        ));
        assert!(matches!(
            calls.invoke(CallKind::Command, &mut e, &call(1, "CmdFire", payload.clone()), Some(ConnectionId(10))),
            Err(CallError::WrongOwner { component: "Door", .. })
        ));
        assert!(matches!(
            calls.invoke(CallKind::Rpc, &mut e, &call(0, "CmdFire", payload), None),
            Err(CallError::UnknownMethod { kind: CallKind::Rpc, .. })
        ));
        assert_eq!(shots(&e), 0);
    }

    #[test]
    fn test_malformed_arguments() {
        let calls = calls();
        let mut e = entity();
        let result = calls.invoke(
            CallKind::Command,
            &mut e,
            &call(0, "CmdFire", Bytes::from_static(&[1, 2])),
            Some(ConnectionId(10)),
        );
        assert!(matches!(result, Err(CallError::Arguments { method: "CmdFire", .. })));
    }

    #[test]
    fn test_command_without_authority() {
        let mut calls = calls();
        assert!(calls.allow_without_authority("CmdFire"));
        assert!(!calls.allow_without_authority("CmdMissing"));
        let mut e = entity();
        e.add_observer(ConnectionId(99));
        calls
            .invoke(CallKind::Command, &mut e, &call(0, "CmdFire", to_bytes(&1u32).unwrap()), Some(ConnectionId(99)))
            .unwrap();
        assert_eq!(shots(&e), 1);
    }

    #[test]
    fn test_exempt_command_needs_an_observer() {
        let mut calls = calls();
        calls.allow_without_authority("CmdFire");
        let mut e = entity();
        assert!(matches!(
            calls.invoke(CallKind::Command, &mut e, &call(0, "CmdFire", to_bytes(&1u32).unwrap()), Some(ConnectionId(42))),
            Err(CallError::NotObserving { sender: ConnectionId(42), .. })
        ));
        assert_eq!(shots(&e), 0);
    }

    #[test]
    fn test_declared_owner_accepts_subtypes() {
        let mut calls = RemoteCalls::new();
        calls.register_dyn(
            CallKind::Rpc,
            ComponentTypeId::from_name("Weapon"),
            "RpcReload",
            |component, ctx, _reader| {
                assert_eq!(ctx.sender, None);
                let turret = component
                    .as_any_mut()
                    .downcast_mut::<Turret>()
                    .ok_or_else(|| WireError::custom("not a turret"))?;
                turret.shots = 0;
                Ok(())
            },
        );
        let mut e = entity();
        e.get_mut::<Turret>().unwrap().shots = 4;
        calls
            .invoke(CallKind::Rpc, &mut e, &call(0, "RpcReload", Bytes::new()), None)
            .unwrap();
        assert_eq!(shots(&e), 0);
        assert!(matches!(
            calls.invoke(CallKind::Rpc, &mut e, &call(1, "RpcReload", Bytes::new()), None),
            Err(CallError::WrongOwner { .. })
        ));
    }
}
