//! Template registry: how peers turn an [`AssetId`] or a [`SceneId`] into a
//! local [`ReplicatedEntity`].

use std::collections::HashMap;

use netsync_component::{AssetId, ComponentError, ReplicatedEntity, SceneId};
use netsync_math::Pose;
use tracing::debug;

use crate::error::ReplicationError;

/// Resolves spawn messages to local entities.
pub trait TemplateRegistry {
    /// Build a fresh, pending instance of `asset` at `pose`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::UnknownAsset`] if nothing is registered,
    /// or the template's own construction error.
    fn instantiate(&self, asset: AssetId, pose: &Pose) -> Result<ReplicatedEntity, ReplicationError>;

    /// Take the dormant scene object `scene` out of the pool.
    fn take_scene_object(&mut self, scene: SceneId) -> Option<ReplicatedEntity>;

    /// Put a reset scene object back into the pool.
    fn store_scene_object(&mut self, entity: ReplicatedEntity);

    /// Scene ids currently dormant.
    fn dormant_scene_ids(&self) -> Vec<SceneId>;
}

type Builder = Box<dyn Fn(&mut ReplicatedEntity) -> Result<(), ComponentError>>;

/// A [`TemplateRegistry`] backed by builder closures.
///
/// A builder receives an empty prefab entity and adds its components.
#[derive(Default)]
pub struct Templates {
    prefabs: HashMap<AssetId, (String, Builder)>,
    dormant: HashMap<SceneId, ReplicatedEntity>,
}

impl Templates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the builder for `asset`.
    pub fn register_prefab<F>(&mut self, asset: AssetId, name: impl Into<String>, builder: F)
    where
        F: Fn(&mut ReplicatedEntity) -> Result<(), ComponentError> + 'static,
    {
        let name = name.into();
        debug!(%asset, name, "registered prefab");
        self.prefabs.insert(asset, (name, Box::new(builder)));
    }

    /// Name a prefab was registered under.
    #[must_use]
    pub fn prefab_name(&self, asset: AssetId) -> Option<&str> {
        self.prefabs.get(&asset).map(|(name, _)| name.as_str())
    }

    /// Add a pre-placed scene object to the dormant pool. Entities without a
    /// scene id are dropped.
    pub fn add_scene_object(&mut self, entity: ReplicatedEntity) {
        self.store_scene_object(entity);
    }
}

impl TemplateRegistry for Templates {
    fn instantiate(&self, asset: AssetId, pose: &Pose) -> Result<ReplicatedEntity, ReplicationError> {
        let (_, builder) = self
            .prefabs
            .get(&asset)
            .ok_or(ReplicationError::UnknownAsset(asset))?;
        let mut entity = ReplicatedEntity::prefab(asset).with_pose(*pose);
        builder(&mut entity)?;
        Ok(entity)
    }

    fn take_scene_object(&mut self, scene: SceneId) -> Option<ReplicatedEntity> {
        self.dormant.remove(&scene)
    }

    fn store_scene_object(&mut self, entity: ReplicatedEntity) {
        match entity.scene_id() {
            Some(scene) => {
                self.dormant.insert(scene, entity);
            }
            None => debug!(asset = ?entity.asset_id(), "not a scene object; dropped"),
        }
    }

    fn dormant_scene_ids(&self) -> Vec<SceneId> {
        let mut ids: Vec<_> = self.dormant.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Templates")
            .field("prefabs", &self.prefabs.len())
            .field("dormant", &self.dormant.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use netsync_component::EntityOrigin;
    use netsync_math::Vec3;

    use super::*;

    #[test]
    fn test_instantiate_sets_origin_and_pose() {
        let asset = AssetId::from_u128(1);
        let mut templates = Templates::new();
        templates.register_prefab(asset, "crate", |_| Ok(()));
        assert_eq!(templates.prefab_name(asset), Some("crate"));

        let pose = Pose::from_position(Vec3::X);
        let entity = templates.instantiate(asset, &pose).unwrap();
        assert_eq!(entity.origin(), EntityOrigin::Prefab(asset));
        assert_eq!(entity.pose, pose);
    }

    #[test]
    fn test_unknown_asset() {
        let templates = Templates::new();
        assert!(matches!(
            templates.instantiate(AssetId::from_u128(9), &Pose::IDENTITY),
            Err(ReplicationError::UnknownAsset(_))
        ));
    }

    #[test]
    fn test_scene_pool() {
        let mut templates = Templates::new();
        templates.add_scene_object(ReplicatedEntity::scene(SceneId(5)));
        templates.add_scene_object(ReplicatedEntity::prefab(AssetId::nil()));
        assert_eq!(templates.dormant_scene_ids(), vec![SceneId(5)]);
        assert!(templates.take_scene_object(SceneId(5)).is_some());
        assert!(templates.take_scene_object(SceneId(5)).is_none());
    }
}
