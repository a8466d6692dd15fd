//! Rotation helpers: constructors, Kabsch superposition and angle metrics.
//!
//! All rotations act on column vectors, `x' = R x`.

use crate::{AlignError, Result};
use nalgebra::{Matrix3, Rotation3, Vector3};

/// Active rotation by `angle` about the z axis.
pub fn rotation_z(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Active rotation by `angle` about the y axis.
pub fn rotation_y(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

/// `R = Rz(alpha) · Ry(beta) · Rz(gamma)`
pub fn euler_zyz(alpha: f64, beta: f64, gamma: f64) -> Matrix3<f64> {
    rotation_z(alpha) * rotation_y(beta) * rotation_z(gamma)
}

/// Rotation whose axis is `v / |v|` and whose angle is `|v|`.
pub fn rotation_from_axis_angle(v: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_scaled_axis(*v).into_inner()
}

/// Geodesic angle in `[0, π]` of a rotation matrix.
pub fn rotation_angle(r: &Matrix3<f64>) -> f64 {
    let cos = ((r.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
    cos.acos()
}

/// Angle of the relative rotation `a · bᵀ`.
pub fn angle_between(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    rotation_angle(&(a * b.transpose()))
}

pub fn transform_points(
    points: &[Vector3<f64>],
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> Vec<Vector3<f64>> {
    points.iter().map(|p| rotation * p + translation).collect()
}

/// Proper rotation minimizing `Σ |R x_i - y_i|²` for already centred sets.
pub fn kabsch_rotation(x: &[Vector3<f64>], y: &[Vector3<f64>]) -> Result<Matrix3<f64>> {
    if x.len() != y.len() {
        return Err(AlignError::ShapeMismatch(format!(
            "kabsch needs paired points, got {} and {}",
            x.len(),
            y.len()
        )));
    }

    let mut h = Matrix3::<f64>::zeros();
    for (p, q) in x.iter().zip(y.iter()) {
        h += p * q.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| AlignError::Numerical("SVD produced no U matrix".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| AlignError::Numerical("SVD produced no V^T matrix".to_string()))?;
    let mut v = v_t.transpose();
    let mut r = v * u.transpose();

    if r.determinant() < 0.0 {
        for i in 0..3 {
            v[(i, 2)] *= -1.0;
        }
        r = v * u.transpose();
    }
    Ok(r)
}
