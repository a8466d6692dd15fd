use crate::{AlignError, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Orthorhombic periodic cell given by its three edge lengths
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicBox {
    lengths: [f64; 3],
}

impl PeriodicBox {
    pub fn new(lengths: [f64; 3]) -> Result<Self> {
        if lengths.iter().any(|l| !l.is_finite() || *l <= 0.0) {
            return Err(AlignError::DimensionError(format!(
                "box lengths must be finite and strictly positive, got {:?}",
                lengths
            )));
        }
        Ok(Self { lengths })
    }

    pub fn cubic(length: f64) -> Result<Self> {
        Self::new([length; 3])
    }

    pub fn lengths(&self) -> [f64; 3] {
        self.lengths
    }

    pub fn length(&self, axis: usize) -> f64 {
        self.lengths[axis]
    }

    /// Length of the cell diagonal
    pub fn diagonal(&self) -> f64 {
        self.lengths.iter().map(|l| l * l).sum::<f64>().sqrt()
    }

    /// Apply the minimum-image convention to a raw difference vector.
    pub fn minimum_image(&self, delta: Vector3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|axis, _| {
            let l = self.lengths[axis];
            delta[axis] - (delta[axis] / l).round() * l
        })
    }

    /// Map a point into the primary cell `[0, L)` on every axis.
    pub fn wrap(&self, point: Vector3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|axis, _| {
            let l = self.lengths[axis];
            let wrapped = point[axis] - (point[axis] / l).floor() * l;
            // floor can round up to exactly L for tiny negative inputs
            if wrapped >= l {
                wrapped - l
            } else {
                wrapped
            }
        })
    }
}

/// Displacement from `p` to `q`, using the minimum image when a box is given.
#[inline]
pub fn displacement(p: &Vector3<f64>, q: &Vector3<f64>, cell: Option<&PeriodicBox>) -> Vector3<f64> {
    let delta = q - p;
    match cell {
        Some(cell) => cell.minimum_image(delta),
        None => delta,
    }
}

#[inline]
pub fn squared_distance(p: &Vector3<f64>, q: &Vector3<f64>, cell: Option<&PeriodicBox>) -> f64 {
    displacement(p, q, cell).norm_squared()
}

/// Sum of squared distances between corresponding points.
pub fn sum_squared_distances(
    a: &[Vector3<f64>],
    b: &[Vector3<f64>],
    cell: Option<&PeriodicBox>,
) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| squared_distance(p, q, cell))
        .sum()
}

pub fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    points.iter().sum::<Vector3<f64>>() / points.len() as f64
}
