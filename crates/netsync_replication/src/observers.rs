//! Interest management: who observes an entity.
//!
//! The server rebuilds an entity's observer set at spawn (`initial = true`)
//! and whenever the application asks it to. A rebuild computes the new set
//! with [`compute_observers`] and turns the difference into spawn and hide
//! messages with [`diff_observers`].

use std::collections::BTreeSet;

use netsync_component::{ConnectionId, ObserverCandidate, ReplicatedEntity};

/// Observer changes to apply after a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverDiff {
    /// Connections that must receive a spawn message.
    pub to_spawn: Vec<ConnectionId>,
    /// Connections that must receive a hide message.
    pub to_hide: Vec<ConnectionId>,
}

impl ObserverDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_spawn.is_empty() && self.to_hide.is_empty()
    }
}

/// The observer set `entity` should have.
///
/// `candidates` are the ready connections; nothing outside them is ever
/// returned. A component with custom visibility decides alone; otherwise
/// every candidate observes. The entity's player owner always observes it
/// while ready.
#[must_use]
pub fn compute_observers(
    entity: &ReplicatedEntity,
    candidates: &[ObserverCandidate],
    initial: bool,
) -> BTreeSet<ConnectionId> {
    let ready: BTreeSet<ConnectionId> = candidates.iter().map(|c| c.connection).collect();
    let mut observers = match entity.custom_observers(candidates, initial) {
        Some(custom) => custom.intersection(&ready).copied().collect(),
        None => ready.clone(),
    };
    if let Some(owner) = entity.player_owner()
        && ready.contains(&owner)
    {
        observers.insert(owner);
    }
    observers
}

/// Spawn every new observer and hide every dropped one. On an initial
/// rebuild everyone in `new` gets a spawn, including existing observers.
#[must_use]
pub fn diff_observers(
    old: &BTreeSet<ConnectionId>,
    new: &BTreeSet<ConnectionId>,
    initial: bool,
) -> ObserverDiff {
    let to_spawn = if initial {
        new.iter().copied().collect()
    } else {
        new.difference(old).copied().collect()
    };
    ObserverDiff {
        to_spawn,
        to_hide: old.difference(new).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use netsync_component::{Replicated, SceneId, SyncState};
    use netsync_math::Pose;

    use super::*;

    fn set(ids: &[u64]) -> BTreeSet<ConnectionId> {
        ids.iter().copied().map(ConnectionId).collect()
    }

    fn candidates(ids: &[u64]) -> Vec<ObserverCandidate> {
        ids.iter()
            .map(|&id| ObserverCandidate {
                connection: ConnectionId(id),
                player_pose: None,
            })
            .collect()
    }

    /// Selects a fixed set, ready or not.
    struct Fixed {
        sync: SyncState,
        ids: Vec<u64>,
    }

    impl Replicated for Fixed {
        fn type_name(&self) -> &'static str {
            "Fixed"
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
            observers: &mut BTreeSet<ConnectionId>,
            _initial: bool,
        ) -> bool {
            observers.extend(self.ids.iter().copied().map(ConnectionId));
            true
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_diff_spawns_new_and_hides_dropped() {
        let diff = diff_observers(&set(&[1, 2, 3]), &set(&[2, 3, 4]), false);
        assert_eq!(diff.to_spawn, vec![ConnectionId(4)]);
        assert_eq!(diff.to_hide, vec![ConnectionId(1)]);
    }

    #[test]
    fn test_initial_diff_spawns_everyone() {
        let diff = diff_observers(&set(&[1, 2]), &set(&[2, 3]), true);
        assert_eq!(diff.to_spawn, vec![ConnectionId(2), ConnectionId(3)]);
        assert_eq!(diff.to_hide, vec![ConnectionId(1)]);
        assert!(diff_observers(&set(&[1]), &set(&[1]), false).is_empty());
    }

    #[test]
    fn test_default_policy_is_every_ready_connection() {
        let entity = ReplicatedEntity::scene(SceneId(1));
        assert_eq!(compute_observers(&entity, &candidates(&[1, 2]), true), set(&[1, 2]));
        assert!(compute_observers(&entity, &[], true).is_empty());
    }

    #[test]
    fn test_custom_policy_is_gated_by_readiness() {
        let entity = ReplicatedEntity::scene(SceneId(1))
            .with_component(Fixed {
                sync: SyncState::new(),
                ids: vec![2, 7],
            })
            .unwrap();
        // 7 is selected but not ready.
        assert_eq!(compute_observers(&entity, &candidates(&[1, 2, 3]), false), set(&[2]));
    }

    #[test]
    fn test_ready_owner_always_observes() {
        let mut entity = ReplicatedEntity::scene(SceneId(1))
            .with_component(Fixed {
                sync: SyncState::new(),
                ids: vec![],
            })
            .unwrap();
        entity.set_player_owner(Some(ConnectionId(3)));
        assert_eq!(compute_observers(&entity, &candidates(&[1, 3]), false), set(&[3]));
        assert!(compute_observers(&entity, &candidates(&[1]), false).is_empty());
    }
}
