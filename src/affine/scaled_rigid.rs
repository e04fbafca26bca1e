//! Similarity transforms with an independent scale per axis.

use std::ops::{Div, Mul};

use nalgebra::{Matrix3, Matrix4, SMatrix, SVector, Vector2};

use super::rigid::Rigid;
use super::rotation::{angle_to_rotation_matrix, Rotation};

/// A scaled rigid transform of compile-time rank `N`:
/// `p -> s .* (R * p) + t`, with `s` applied per output axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaledRigid<const N: usize> {
    rotation: SMatrix<f64, N, N>,
    translation: SVector<f64, N>,
    scale: SVector<f64, N>,
}

/// 2-D scaled rigid transform.
pub type ScaledRigid2 = ScaledRigid<2>;
/// 3-D scaled rigid transform.
pub type ScaledRigid3 = ScaledRigid<3>;

impl<const N: usize> ScaledRigid<N> {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: SMatrix::identity(),
            translation: SVector::zeros(),
            scale: SVector::repeat(1.0),
        }
    }

    #[must_use]
    pub fn new(
        rotation: SMatrix<f64, N, N>,
        translation: SVector<f64, N>,
        scale: SVector<f64, N>,
    ) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(translation: SVector<f64, N>) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// A pure per-axis scale.
    #[must_use]
    pub fn from_scale(scale: SVector<f64, N>) -> Self {
        Self {
            scale,
            ..Self::identity()
        }
    }

    /// A pure uniform scale.
    #[must_use]
    pub fn from_uniform_scale(scale: f64) -> Self {
        Self::from_scale(SVector::repeat(scale))
    }

    #[must_use]
    pub fn rotation(&self) -> &SMatrix<f64, N, N> {
        &self.rotation
    }

    #[must_use]
    pub fn translation(&self) -> &SVector<f64, N> {
        &self.translation
    }

    #[must_use]
    pub fn scale(&self) -> &SVector<f64, N> {
        &self.scale
    }

    pub fn set_rotation(&mut self, rotation: SMatrix<f64, N, N>) {
        self.rotation = rotation;
    }

    #[must_use]
    pub fn transform(&self, point: &SVector<f64, N>) -> SVector<f64, N> {
        (self.rotation * point).component_mul(&self.scale) + self.translation
    }

    #[must_use]
    pub fn transform_all(&self, points: &[SVector<f64, N>]) -> Vec<SVector<f64, N>> {
        points.iter().map(|p| self.transform(p)).collect()
    }

    /// Exact inverse mapping of [`ScaledRigid::transform`].
    #[must_use]
    pub fn transform_inverse(&self, point: &SVector<f64, N>) -> SVector<f64, N> {
        self.rotation.transpose() * (point - self.translation).component_div(&self.scale)
    }

    /// The inverse transform in the same parameterization. Exact when the
    /// scale is uniform or the rotation is a signed axis permutation, which
    /// covers every composition built by this crate.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        let scale = SVector::<f64, N>::repeat(1.0).component_div(&self.scale);
        let translation = (rotation * (-self.translation)).component_mul(&scale);
        Self {
            rotation,
            translation,
            scale,
        }
    }
}

impl ScaledRigid<2> {
    /// Counterclockwise rotation by `angle` radians, then scale, then
    /// translation.
    #[must_use]
    pub fn from_angle(angle: f64, translation: Vector2<f64>, scale: Vector2<f64>) -> Self {
        Self {
            rotation: angle_to_rotation_matrix(angle),
            translation,
            scale,
        }
    }

    /// Homogeneous 3x3 matrix with the scale folded into the rotation rows.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let mut m = Matrix3::identity();
        for r in 0..2 {
            for c in 0..2 {
                m[(r, c)] = self.rotation[(r, c)] * self.scale[r];
            }
            m[(r, 2)] = self.translation[r];
        }
        m
    }
}

impl ScaledRigid<3> {
    /// Homogeneous 4x4 matrix with the scale folded into the rotation rows.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = self.rotation[(r, c)] * self.scale[r];
            }
            m[(r, 3)] = self.translation[r];
        }
        m
    }
}

impl<const N: usize> Default for ScaledRigid<N> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const N: usize> From<Rigid<N>> for ScaledRigid<N> {
    fn from(rigid: Rigid<N>) -> Self {
        Self {
            rotation: *rigid.rotation(),
            translation: *rigid.translation(),
            scale: SVector::repeat(1.0),
        }
    }
}

impl<const N: usize> From<Rotation<N>> for ScaledRigid<N> {
    fn from(rotation: Rotation<N>) -> Self {
        Self {
            rotation: *rotation.matrix(),
            translation: SVector::zeros(),
            scale: SVector::repeat(1.0),
        }
    }
}

impl<const N: usize> Mul for ScaledRigid<N> {
    type Output = ScaledRigid<N>;

    fn mul(self, rhs: Self) -> Self {
        Self {
            rotation: self.rotation * rhs.rotation,
            translation: self.transform(&rhs.translation),
            scale: self.scale.component_mul(&rhs.scale),
        }
    }
}

impl<const N: usize> Div for ScaledRigid<N> {
    type Output = ScaledRigid<N>;

    fn div(self, rhs: Self) -> Self {
        self * rhs.inverse()
    }
}
