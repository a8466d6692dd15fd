use crate::data::GroundTruth;
use crate::geometry::{angle_between, PeriodicBox};
use crate::pipeline::AlignmentResult;
use nalgebra::Vector3;

/// Root-mean-square deviation from a sum of squared distances.
pub fn rmsd_from_distance(distance: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        (distance / n as f64).sqrt()
    }
}

/// Angle in radians between the recovered rotation and the true one.
pub fn calculate_rotation_error(result: &AlignmentResult, truth: &GroundTruth) -> f64 {
    angle_between(&result.rotation, &truth.transform.rotation)
}

/// Distance between recovered and true translations, minimum image in a box.
pub fn calculate_translation_error(
    result: &AlignmentResult,
    truth: &GroundTruth,
    cell: Option<&PeriodicBox>,
) -> f64 {
    let delta: Vector3<f64> = result.translation - truth.transform.translation;
    match cell {
        Some(cell) => cell.minimum_image(delta).norm(),
        None => delta.norm(),
    }
}

/// Fraction of points paired with a different partner than the ground truth.
pub fn permutation_error_rate(result: &AlignmentResult, truth: &GroundTruth) -> f64 {
    if truth.permutation.is_empty() {
        return 0.0;
    }
    let wrong = result
        .permutation
        .iter()
        .zip(&truth.permutation)
        .filter(|(a, b)| a != b)
        .count();
    wrong as f64 / truth.permutation.len() as f64
}
