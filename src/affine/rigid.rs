//! Rigid transforms: rotation followed by translation.

use std::ops::{Div, Mul};

use nalgebra::{Matrix3, Matrix4, SMatrix, SVector, Vector2};

use super::rotation::{angle_to_rotation_matrix, slerp_rotation_matrix, Rotation};

/// A rigid transform of compile-time rank `N`: `p -> R * p + t`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rigid<const N: usize> {
    rotation: SMatrix<f64, N, N>,
    translation: SVector<f64, N>,
}

/// 2-D rigid transform.
pub type Rigid2 = Rigid<2>;
/// 3-D rigid transform.
pub type Rigid3 = Rigid<3>;

impl<const N: usize> Rigid<N> {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: SMatrix::identity(),
            translation: SVector::zeros(),
        }
    }

    #[must_use]
    pub fn new(rotation: SMatrix<f64, N, N>, translation: SVector<f64, N>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(translation: SVector<f64, N>) -> Self {
        Self {
            rotation: SMatrix::identity(),
            translation,
        }
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
    pub fn transform(&self, point: &SVector<f64, N>) -> SVector<f64, N> {
        self.rotation * point + self.translation
    }

    #[must_use]
    pub fn transform_all(&self, points: &[SVector<f64, N>]) -> Vec<SVector<f64, N>> {
        points.iter().map(|p| self.transform(p)).collect()
    }

    #[must_use]
    pub fn transform_inverse(&self, point: &SVector<f64, N>) -> SVector<f64, N> {
        self.rotation.transpose() * (point - self.translation)
    }

    /// Closed-form inverse: `p -> R^T * p - R^T * t`.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Self {
            rotation,
            translation: rotation * (-self.translation),
        }
    }
}

impl Rigid<2> {
    /// Counterclockwise rotation by `angle` radians followed by `translation`.
    #[must_use]
    pub fn from_angle(angle: f64, translation: Vector2<f64>) -> Self {
        Self {
            rotation: angle_to_rotation_matrix(angle),
            translation,
        }
    }

    /// Homogeneous 3x3 matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let mut m = Matrix3::identity();
        m.fixed_view_mut::<2, 2>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<2, 1>(0, 2).copy_from(&self.translation);
        m
    }
}

impl Rigid<3> {
    /// Homogeneous 4x4 matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

impl<const N: usize> Default for Rigid<N> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const N: usize> From<Rotation<N>> for Rigid<N> {
    fn from(rotation: Rotation<N>) -> Self {
        Self {
            rotation: *rotation.matrix(),
            translation: SVector::zeros(),
        }
    }
}

impl<const N: usize> Mul for Rigid<N> {
    type Output = Rigid<N>;

    fn mul(self, rhs: Self) -> Self {
        Self {
            rotation: self.rotation * rhs.rotation,
            translation: self.transform(&rhs.translation),
        }
    }
}

impl<const N: usize> Div for Rigid<N> {
    type Output = Rigid<N>;

    fn div(self, rhs: Self) -> Self {
        self * rhs.inverse()
    }
}

/// Interpolate between two 3-D rigid transforms: SLERP on the rotation,
/// linear blend on the translation.
#[must_use]
pub fn slerp_rigid(first: &Rigid3, second: &Rigid3, alpha: f64) -> Rigid3 {
    Rigid3::new(
        slerp_rotation_matrix(first.rotation(), second.rotation(), alpha),
        first.translation() + alpha * (second.translation() - first.translation()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn random_rigid2(rng: &mut StdRng) -> Rigid2 {
        Rigid2::from_angle(
            rng.gen_range(-PI..PI),
            Vector2::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0)),
        )
    }

    #[test]
    fn test_inverse_roundtrip() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let t = random_rigid2(&mut rng);
            let p = Vector2::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0));
            let back = t.inverse().transform(&t.transform(&p));
            assert!((back - p).norm() < 1e-9);
            let back2 = t.transform_inverse(&t.transform(&p));
            assert!((back2 - p).norm() < 1e-9);
        }
    }

    #[test]
    fn test_composition_matches_chaining() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let a = random_rigid2(&mut rng);
            let b = random_rigid2(&mut rng);
            let p = Vector2::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0));
            let composed = (a * b).transform(&p);
            let chained = a.transform(&b.transform(&p));
            assert!((composed - chained).norm() < 1e-9);
        }
    }

    #[test]
    fn test_composition_associative() {
        let mut rng = StdRng::seed_from_u64(17);
        let a = random_rigid2(&mut rng);
        let b = random_rigid2(&mut rng);
        let c = random_rigid2(&mut rng);
        let p = Vector2::new(1.0, -4.0);
        let left = ((a * b) * c).transform(&p);
        let right = (a * (b * c)).transform(&p);
        assert!((left - right).norm() < 1e-9);
    }

    #[test]
    fn test_divide_undoes_compose() {
        let mut rng = StdRng::seed_from_u64(19);
        let a = random_rigid2(&mut rng);
        let b = random_rigid2(&mut rng);
        let recovered = (a * b) / b;
        let p = Vector2::new(2.0, 3.0);
        assert!((recovered.transform(&p) - a.transform(&p)).norm() < 1e-9);
    }

    #[test]
    fn test_slerp_rigid_endpoints() {
        let first = Rigid3::new(
            super::super::rotation::quaternion_to_rotation_matrix(
                &super::super::rotation::axis_angle_to_quaternion(&Vector3::z(), 0.3),
            ),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let second = Rigid3::new(
            super::super::rotation::quaternion_to_rotation_matrix(
                &super::super::rotation::axis_angle_to_quaternion(&Vector3::x(), 1.2),
            ),
            Vector3::new(-2.0, 0.0, 5.0),
        );
        let start = slerp_rigid(&first, &second, 0.0);
        let end = slerp_rigid(&first, &second, 1.0);
        assert!((start.translation() - first.translation()).norm() < 1e-9);
        assert!((end.translation() - second.translation()).norm() < 1e-9);
        assert!((start.rotation() - first.rotation()).norm() < 1e-6);
        assert!((end.rotation() - second.rotation()).norm() < 1e-6);
    }

    #[test]
    fn test_homogeneous_matrix() {
        let t = Rigid2::from_angle(0.5, Vector2::new(4.0, -1.0));
        let m = t.to_matrix();
        let p = Vector2::new(2.0, 2.0);
        let hp = m * nalgebra::Vector3::new(p.x, p.y, 1.0);
        let direct = t.transform(&p);
        assert!((hp.xy() - direct).norm() < 1e-12);
    }
}
