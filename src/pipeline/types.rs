use crate::geometry::{self, PeriodicBox};
use crate::{AlignError, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Labelled configuration of points in three dimensions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSet {
    positions: Vec<Vector3<f64>>,
    labels: Vec<u32>,
}

impl PointSet {
    pub fn new(positions: Vec<Vector3<f64>>, labels: Vec<u32>) -> Result<Self> {
        if positions.len() != labels.len() {
            return Err(AlignError::DimensionError(format!(
                "{} positions but {} type labels",
                positions.len(),
                labels.len()
            )));
        }
        if let Some(i) = positions.iter().position(|p| p.iter().any(|c| !c.is_finite())) {
            return Err(AlignError::DimensionError(format!(
                "coordinate {} is not finite: {:?}",
                i, positions[i]
            )));
        }
        Ok(Self { positions, labels })
    }

    pub fn from_coords(coords: &[[f64; 3]], labels: Vec<u32>) -> Result<Self> {
        Self::new(coords.iter().map(|c| Vector3::from(*c)).collect(), labels)
    }

    /// All points share a single type class.
    pub fn uniform(positions: Vec<Vector3<f64>>) -> Result<Self> {
        let labels = vec![0; positions.len()];
        Self::new(positions, labels)
    }

    /// Labels are taken from explicit permutation groups: every point of group
    /// `g` gets label `g`.
    pub fn from_groups(positions: Vec<Vector3<f64>>, groups: &PermutationGroups) -> Result<Self> {
        if groups.total() != positions.len() {
            return Err(AlignError::DimensionError(format!(
                "permutation groups cover {} indices for {} positions",
                groups.total(),
                positions.len()
            )));
        }
        let mut labels = vec![0; positions.len()];
        for (label, group) in groups.labels().iter().zip(groups.groups()) {
            for &i in group {
                labels[i] = *label;
            }
        }
        Self::new(positions, labels)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn groups(&self) -> PermutationGroups {
        PermutationGroups::from_labels(&self.labels)
    }

    pub fn centroid(&self) -> Vector3<f64> {
        geometry::centroid(&self.positions)
    }

    /// Same labels, new coordinates.
    pub fn with_positions(&self, positions: Vec<Vector3<f64>>) -> Result<Self> {
        Self::new(positions, self.labels.clone())
    }
}

/// Partition of `0..N` into classes of interchangeable points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationGroups {
    labels: Vec<u32>,
    groups: Vec<Vec<usize>>,
}

impl PermutationGroups {
    /// Classes are ordered by ascending label, indices ascending within a class.
    pub fn from_labels(labels: &[u32]) -> Self {
        let mut classes: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            classes.entry(*label).or_default().push(i);
        }
        let (labels, groups): (Vec<u32>, Vec<Vec<usize>>) = classes.into_iter().unzip();
        Self { labels, groups }
    }

    /// Validate explicit index lists covering `0..n` exactly once.
    pub fn from_lists(lists: Vec<Vec<usize>>, n: usize) -> Result<Self> {
        let mut seen = vec![false; n];
        for list in &lists {
            for &i in list {
                if i >= n {
                    return Err(AlignError::DimensionError(format!(
                        "permutation index {} out of range for {} points",
                        i, n
                    )));
                }
                if seen[i] {
                    return Err(AlignError::DimensionError(format!(
                        "index {} appears in more than one permutation group",
                        i
                    )));
                }
                seen[i] = true;
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(AlignError::DimensionError(format!(
                "index {} is not covered by any permutation group",
                missing
            )));
        }
        let labels = (0..lists.len() as u32).collect();
        Ok(Self {
            labels,
            groups: lists,
        })
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn counts(&self) -> Vec<usize> {
        self.groups.iter().map(Vec::len).collect()
    }

    pub fn total(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Both partitions must have the same labels with the same cardinalities.
    pub fn check_compatible(&self, other: &PermutationGroups) -> Result<()> {
        if self.labels != other.labels || self.counts() != other.counts() {
            return Err(AlignError::ShapeMismatch(format!(
                "type classes differ: {:?} x {:?} vs {:?} x {:?}",
                self.labels,
                self.counts(),
                other.labels,
                other.counts()
            )));
        }
        Ok(())
    }
}

/// Rigid motion `x -> rotation · x + translation`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation,
        }
    }

    pub fn rotation(rotation: Matrix3<f64>) -> Self {
        Self {
            rotation,
            translation: Vector3::zeros(),
        }
    }

    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }

    pub fn apply_all(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        geometry::transform_points(points, &self.rotation, &self.translation)
    }
}

/// A grid transform proposed by the overlap evaluator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub transform: RigidTransform,
    pub score: f64,
    pub grid_index: usize,
}

/// Permutation-only alignment at the identity transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HungarianResult {
    pub distance: f64,
    pub permutation: Vec<usize>,
}

/// Best alignment found between two configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Sum of squared distances after alignment
    pub distance: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// `permutation[i] = j` pairs point `i` of the first configuration with
    /// point `j` of the second
    pub permutation: Vec<usize>,
    /// First configuration after the rigid transform
    pub aligned1: Vec<Vector3<f64>>,
    /// Second configuration reordered by the permutation
    pub aligned2: Vec<Vector3<f64>>,
    /// The rotation includes a point inversion
    pub inverted: bool,
}

impl AlignmentResult {
    pub fn rmsd(&self) -> f64 {
        if self.permutation.is_empty() {
            0.0
        } else {
            (self.distance / self.permutation.len() as f64).sqrt()
        }
    }

    pub fn norm(&self) -> f64 {
        self.distance.sqrt()
    }

    pub fn transform(&self) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation,
            translation: self.translation,
        }
    }

    /// Recompute the metric between the two aligned sets.
    pub fn recompute_distance(&self, cell: Option<&PeriodicBox>) -> f64 {
        geometry::sum_squared_distances(&self.aligned1, &self.aligned2, cell)
    }
}
