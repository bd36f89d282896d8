//! # netsync_math
//!
//! Math types for the netsync replication protocol. Re-exports [`glam`] for
//! linear algebra and defines [`Pose`], the placement sent with every spawn.

pub mod pose;

// Re-export glam types for convenience.
pub use glam::{Quat, Vec3};

pub use pose::Pose;
