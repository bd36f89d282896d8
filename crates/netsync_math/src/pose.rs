//! Spawn pose.
//!
//! [`Pose`] is the position, rotation and scale a remote peer uses when it
//! instantiates a replicated entity from a template.

use glam::{Quat, Vec3};
use netsync_wire::{NetworkReader, NetworkWriter, WireCodec, WireError};
use serde::{Deserialize, Serialize};

/// Position, rotation and per-axis scale of an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    /// World-space position.
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Per-axis scale.
    pub scale: Vec3,
}

impl Pose {
    /// Origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a pose at `position` with default rotation and scale.
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Move the pose by `offset`.
    #[must_use]
    pub fn translated(mut self, offset: Vec3) -> Self {
        self.position += offset;
        self
    }

    /// Straight-line distance between two poses' positions.
    #[must_use]
    pub fn distance(&self, other: &Pose) -> f32 {
        self.position.distance(other.position)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn write_vec3(writer: &mut NetworkWriter, v: Vec3) {
    writer.write_f32(v.x);
    writer.write_f32(v.y);
    writer.write_f32(v.z);
}

fn read_vec3(reader: &mut NetworkReader<'_>) -> Result<Vec3, WireError> {
    Ok(Vec3::new(
        reader.read_f32()?,
        reader.read_f32()?,
        reader.read_f32()?,
    ))
}

impl WireCodec for Pose {
    fn encode(&self, writer: &mut NetworkWriter) -> Result<(), WireError> {
        write_vec3(writer, self.position);
        let [x, y, z, w] = self.rotation.to_array();
        for component in [x, y, z, w] {
            writer.write_f32(component);
        }
        write_vec3(writer, self.scale);
        Ok(())
    }

    fn decode(reader: &mut NetworkReader<'_>) -> Result<Self, WireError> {
        let position = read_vec3(reader)?;
        let rotation = Quat::from_xyzw(
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
        );
        let scale = read_vec3(reader)?;
        Ok(Self {
            position,
            rotation,
            scale,
        })
    }
}
