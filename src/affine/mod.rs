//! Fixed-rank affine transforms used by the coordinate engine.
//!
//! Three transform families share the same contract (`transform`,
//! `transform_inverse`, `transform_all`, `inverse`, `*` composition and `/`
//! division): [`Rotation`], [`Rigid`] (rotation + translation) and
//! [`ScaledRigid`] (rotation + translation + per-axis scale). Rank is a
//! compile-time parameter; the tile pipeline is strictly 2-D, while the 3-D
//! instantiations carry the quaternion and SLERP utilities.

pub mod rigid;
pub mod rotation;
pub mod scaled_rigid;

pub use rigid::{slerp_rigid, Rigid, Rigid2, Rigid3};
pub use rotation::{
    angle_between, angle_to_rotation_matrix, axis_angle_to_quaternion, normalize_angle,
    quaternion_to_rotation_matrix, rotation_matrix_to_angle, rotation_matrix_to_quaternion,
    slerp_quaternion, slerp_rotation_matrix, Rotation, Rotation2, Rotation3,
};
pub use scaled_rigid::{ScaledRigid, ScaledRigid2, ScaledRigid3};
