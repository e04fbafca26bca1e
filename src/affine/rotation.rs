//! Pure rotations and the angle/quaternion conversions behind them.

use std::f64::consts::PI;
use std::ops::{Div, Mul};

use nalgebra::{Matrix2, Matrix3, SMatrix, SVector, Vector2, Vector3, Vector4};

/// Wrap an angle into `[-pi, pi)`.
#[must_use]
pub fn normalize_angle(mut angle: f64) -> f64 {
    while angle >= PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Counterclockwise 2-D rotation matrix for `angle` radians.
#[must_use]
pub fn angle_to_rotation_matrix(angle: f64) -> Matrix2<f64> {
    let (sin, cos) = angle.sin_cos();
    Matrix2::new(cos, -sin, sin, cos)
}

/// Angle of a 2-D rotation matrix, in `(-pi, pi]`.
#[must_use]
pub fn rotation_matrix_to_angle(matrix: &Matrix2<f64>) -> f64 {
    matrix[(1, 0)].atan2(matrix[(0, 0)])
}

/// Signed counterclockwise angle from `from` to `to`.
#[must_use]
pub fn angle_between(from: &Vector2<f64>, to: &Vector2<f64>) -> f64 {
    normalize_angle(to.y.atan2(to.x) - from.y.atan2(from.x))
}

/// Convert a 3-D rotation matrix to a unit quaternion in `wxyz` order.
///
/// Uses the branch on the largest component so the square roots stay away
/// from zero for every input orientation.
#[must_use]
pub fn rotation_matrix_to_quaternion(m: &Matrix3<f64>) -> Vector4<f64> {
    let q0 = (0.25 * (1.0 + m[(0, 0)] + m[(1, 1)] + m[(2, 2)])).max(0.0).sqrt();
    let q1 = (0.25 * (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)])).max(0.0).sqrt();
    let q2 = (0.25 * (1.0 - m[(0, 0)] + m[(1, 1)] - m[(2, 2)])).max(0.0).sqrt();
    let q3 = (0.25 * (1.0 - m[(0, 0)] - m[(1, 1)] + m[(2, 2)])).max(0.0).sqrt();

    let psign = |i: usize, j: usize| -> f64 {
        if m[(i, j)] + m[(j, i)] >= 0.0 {
            1.0
        } else {
            -1.0
        }
    };
    let nsign = |i: usize, j: usize| -> f64 {
        if m[(i, j)] - m[(j, i)] >= 0.0 {
            1.0
        } else {
            -1.0
        }
    };

    let mut q = if q0 >= q1 && q0 >= q2 && q0 >= q3 {
        Vector4::new(q0, q1 * nsign(2, 1), q2 * nsign(0, 2), q3 * nsign(1, 0))
    } else if q1 >= q0 && q1 >= q2 && q1 >= q3 {
        Vector4::new(q0 * nsign(2, 1), q1, q2 * psign(1, 0), q3 * psign(0, 2))
    } else if q2 >= q0 && q2 >= q1 && q2 >= q3 {
        Vector4::new(q0 * nsign(0, 2), q1 * psign(1, 0), q2, q3 * psign(2, 1))
    } else {
        Vector4::new(q0 * nsign(1, 0), q1 * psign(2, 0), q2 * psign(2, 1), q3)
    };
    q /= q.norm();
    q
}

/// Convert a unit quaternion in `wxyz` order to a 3-D rotation matrix.
#[must_use]
pub fn quaternion_to_rotation_matrix(q: &Vector4<f64>) -> Matrix3<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    Matrix3::new(
        1.0 - 2.0 * y * y - 2.0 * z * z,
        2.0 * x * y - 2.0 * z * w,
        2.0 * x * z + 2.0 * y * w,
        2.0 * x * y + 2.0 * z * w,
        1.0 - 2.0 * x * x - 2.0 * z * z,
        2.0 * y * z - 2.0 * x * w,
        2.0 * x * z - 2.0 * y * w,
        2.0 * y * z + 2.0 * x * w,
        1.0 - 2.0 * x * x - 2.0 * y * y,
    )
}

/// Quaternion for a rotation of `angle` radians about `axis`.
#[must_use]
pub fn axis_angle_to_quaternion(axis: &Vector3<f64>, angle: f64) -> Vector4<f64> {
    let axis = axis / axis.norm();
    let (sin, cos) = (angle / 2.0).sin_cos();
    Vector4::new(cos, axis.x * sin, axis.y * sin, axis.z * sin)
}

/// Spherical linear interpolation between two unit quaternions (`wxyz`).
///
/// Flips the sign of `q2` when the dot product is negative so the blend
/// follows the shorter arc; falls back to a renormalized linear blend when
/// the quaternions are nearly parallel.
#[must_use]
pub fn slerp_quaternion(q1: &Vector4<f64>, q2: &Vector4<f64>, alpha: f64) -> Vector4<f64> {
    let mut q2 = *q2;
    let mut dot = q1.dot(&q2);
    if dot < 0.0 {
        dot = -dot;
        q2 = -q2;
    }

    let mut result = if dot > 0.9999 {
        q1 + alpha * (q2 - q1)
    } else {
        let theta_0 = dot.acos();
        let sin_theta_0 = theta_0.sin();
        let theta = theta_0 * alpha;
        let sin_theta = theta.sin();

        let s1 = theta.cos() - dot * sin_theta / sin_theta_0;
        let s2 = sin_theta / sin_theta_0;
        s1 * q1 + s2 * q2
    };
    result /= result.norm();
    result
}

/// SLERP between two 3-D rotation matrices.
#[must_use]
pub fn slerp_rotation_matrix(m1: &Matrix3<f64>, m2: &Matrix3<f64>, alpha: f64) -> Matrix3<f64> {
    quaternion_to_rotation_matrix(&slerp_quaternion(
        &rotation_matrix_to_quaternion(m1),
        &rotation_matrix_to_quaternion(m2),
        alpha,
    ))
}

/// An orthonormal rotation of compile-time rank `N`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rotation<const N: usize> {
    matrix: SMatrix<f64, N, N>,
}

/// 2-D rotation.
pub type Rotation2 = Rotation<2>;
/// 3-D rotation.
pub type Rotation3 = Rotation<3>;

impl<const N: usize> Rotation<N> {
    /// The identity rotation.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            matrix: SMatrix::identity(),
        }
    }

    /// Wrap an orthonormal matrix. The caller guarantees orthonormality.
    #[must_use]
    pub fn from_matrix(matrix: SMatrix<f64, N, N>) -> Self {
        Self { matrix }
    }

    #[must_use]
    pub fn matrix(&self) -> &SMatrix<f64, N, N> {
        &self.matrix
    }

    /// Rotate a point.
    #[must_use]
    pub fn transform(&self, point: &SVector<f64, N>) -> SVector<f64, N> {
        self.matrix * point
    }

    /// Rotate a batch of points.
    #[must_use]
    pub fn transform_all(&self, points: &[SVector<f64, N>]) -> Vec<SVector<f64, N>> {
        points.iter().map(|p| self.transform(p)).collect()
    }

    /// Apply the inverse rotation to a point.
    #[must_use]
    pub fn transform_inverse(&self, point: &SVector<f64, N>) -> SVector<f64, N> {
        self.matrix.transpose() * point
    }

    /// The inverse rotation (transpose, since the matrix is orthonormal).
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            matrix: self.matrix.transpose(),
        }
    }
}

impl Rotation<2> {
    /// Counterclockwise rotation by `angle` radians.
    #[must_use]
    pub fn from_angle(angle: f64) -> Self {
        Self {
            matrix: angle_to_rotation_matrix(angle),
        }
    }

    /// The rotation angle in `(-pi, pi]`.
    #[must_use]
    pub fn angle(&self) -> f64 {
        rotation_matrix_to_angle(&self.matrix)
    }

    /// True if the matrix mirrors (determinant below zero). Signed
    /// permutations produced by axes transformations may mirror.
    #[must_use]
    pub fn flips(&self) -> bool {
        self.matrix.determinant() < 0.0
    }
}

impl Rotation<3> {
    /// Rotation from a unit quaternion in `wxyz` order.
    #[must_use]
    pub fn from_quaternion(q: &Vector4<f64>) -> Self {
        Self {
            matrix: quaternion_to_rotation_matrix(q),
        }
    }

    /// The rotation as a unit quaternion in `wxyz` order.
    #[must_use]
    pub fn to_quaternion(&self) -> Vector4<f64> {
        rotation_matrix_to_quaternion(&self.matrix)
    }

    #[must_use]
    pub fn flips(&self) -> bool {
        self.matrix.determinant() < 0.0
    }
}

impl<const N: usize> Default for Rotation<N> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const N: usize> Mul for Rotation<N> {
    type Output = Rotation<N>;

    fn mul(self, rhs: Self) -> Self {
        Self {
            matrix: self.matrix * rhs.matrix,
        }
    }
}

impl<const N: usize> Div for Rotation<N> {
    type Output = Rotation<N>;

    fn div(self, rhs: Self) -> Self {
        self * rhs.inverse()
    }
}
