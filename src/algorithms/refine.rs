//! Local refinement of a candidate transform.
//!
//! Both modes alternate an exact assignment with a closed-form transform
//! update for that assignment. A step is kept only when it lowers the
//! distance, so the sequence is monotone and stops at the first non-improving
//! step or after `max_iterations` updates.

use crate::algorithms::hungarian::assign_by_type;
use crate::geometry::{displacement, kabsch_rotation, transform_points, PeriodicBox};
use crate::pipeline::PermutationGroups;
use crate::Result;
use nalgebra::{Matrix3, Vector3};
use tracing::trace;

/// Inputs shared by every refinement of one alignment problem
pub struct Refiner<'a> {
    /// First configuration, centred (spherical) or raw (periodic), with any
    /// inversion already applied
    pub moving: &'a [Vector3<f64>],
    pub fixed: &'a [Vector3<f64>],
    pub groups1: &'a PermutationGroups,
    pub groups2: &'a PermutationGroups,
    pub cell: Option<&'a PeriodicBox>,
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refined {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub permutation: Vec<usize>,
    pub distance: f64,
    pub steps: usize,
}

impl<'a> Refiner<'a> {
    fn assign(&self, rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> (Vec<usize>, f64) {
        let moved = transform_points(self.moving, rotation, translation);
        assign_by_type(&moved, self.fixed, self.groups1, self.groups2, self.cell)
    }

    /// Assignment at a fixed transform, no refinement
    pub fn evaluate(&self, rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Refined {
        let (permutation, distance) = self.assign(rotation, translation);
        Refined {
            rotation: *rotation,
            translation: *translation,
            permutation,
            distance,
            steps: 0,
        }
    }

    /// Rotation about the origin, alternating assignment and Kabsch.
    pub fn refine_rotation(&self, start: &Matrix3<f64>) -> Result<Refined> {
        let origin = Vector3::zeros();
        let mut best = self.evaluate(start, &origin);

        for step in 1..=self.max_iterations {
            let matched: Vec<Vector3<f64>> =
                best.permutation.iter().map(|&j| self.fixed[j]).collect();
            let rotation = kabsch_rotation(self.moving, &matched)?;
            let (permutation, distance) = self.assign(&rotation, &origin);
            trace!(step, distance, previous = best.distance, "Kabsch step");
            if distance < best.distance - self.tolerance {
                best = Refined {
                    rotation,
                    translation: origin,
                    permutation,
                    distance,
                    steps: step,
                };
            } else {
                break;
            }
        }
        Ok(best)
    }

    /// Translation under a fixed rotation, alternating assignment and the mean
    /// minimum-image residual.
    pub fn refine_translation(&self, rotation: &Matrix3<f64>, start: &Vector3<f64>) -> Refined {
        let mut best = self.evaluate(rotation, start);
        if self.moving.is_empty() {
            return best;
        }

        for step in 1..=self.max_iterations {
            let moved = transform_points(self.moving, rotation, &best.translation);
            let residual: Vector3<f64> = moved
                .iter()
                .zip(&best.permutation)
                .map(|(p, &j)| displacement(p, &self.fixed[j], self.cell))
                .sum();
            let mut translation = best.translation + residual / moved.len() as f64;
            if let Some(cell) = self.cell {
                translation = cell.minimum_image(translation);
            }
            let (permutation, distance) = self.assign(rotation, &translation);
            trace!(step, distance, previous = best.distance, "Translation step");
            if distance < best.distance - self.tolerance {
                best = Refined {
                    rotation: *rotation,
                    translation,
                    permutation,
                    distance,
                    steps: step,
                };
            } else {
                break;
            }
        }
        best
    }
}
