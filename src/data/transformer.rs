use crate::geometry::{transform_points, PeriodicBox};
use crate::pipeline::{PointSet, RigidTransform};
use crate::{AlignError, Result};
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};

/// Known perturbation applied to a configuration, for validating alignments
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub transform: RigidTransform,
    /// `permutation[i] = j`: point `i` of the source is point `j` of the
    /// perturbed copy
    pub permutation: Vec<usize>,
    pub inverted: bool,
}

/// Seeded rigid motions, relabellings and noise on point sets
pub struct ConfigurationTransformer {
    rng: StdRng,
}

impl ConfigurationTransformer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn apply(points: &PointSet, transform: &RigidTransform) -> Result<PointSet> {
        points.with_positions(transform.apply_all(points.positions()))
    }

    pub fn rotate(points: &PointSet, rotation: &Matrix3<f64>) -> Result<PointSet> {
        points.with_positions(transform_points(points.positions(), rotation, &Vector3::zeros()))
    }

    pub fn translate(points: &PointSet, shift: &Vector3<f64>) -> Result<PointSet> {
        points.with_positions(points.positions().iter().map(|p| p + shift).collect())
    }

    /// Point inversion through the origin.
    pub fn invert(points: &PointSet) -> Result<PointSet> {
        points.with_positions(points.positions().iter().map(|p| -p).collect())
    }

    pub fn wrap(points: &PointSet, cell: &PeriodicBox) -> Result<PointSet> {
        points.with_positions(points.positions().iter().map(|p| cell.wrap(*p)).collect())
    }

    /// Uniformly distributed rotation.
    pub fn random_rotation(&mut self) -> Matrix3<f64> {
        let q: [f64; 4] = std::array::from_fn(|_| StandardNormal.sample(&mut self.rng));
        UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3]))
            .to_rotation_matrix()
            .into_inner()
    }

    /// Reorder points within each type class. Returns the shuffled copy and
    /// the permutation that pairs source point `i` with copy point `j`.
    pub fn shuffle_within_types(&mut self, points: &PointSet) -> Result<(PointSet, Vec<usize>)> {
        let n = points.len();
        // order[k] is the source index placed at slot k
        let mut order: Vec<usize> = (0..n).collect();
        for group in points.groups().groups() {
            let mut shuffled = group.clone();
            shuffled.shuffle(&mut self.rng);
            for (&slot, &source) in group.iter().zip(&shuffled) {
                order[slot] = source;
            }
        }

        let positions = order.iter().map(|&i| points.positions()[i]).collect();
        let labels = order.iter().map(|&i| points.labels()[i]).collect();
        let mut permutation = vec![0; n];
        for (slot, &source) in order.iter().enumerate() {
            permutation[source] = slot;
        }
        Ok((PointSet::new(positions, labels)?, permutation))
    }

    /// Independent Gaussian displacement of every coordinate.
    pub fn rattle(&mut self, points: &PointSet, sigma: f64) -> Result<PointSet> {
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| AlignError::DimensionError(format!("invalid rattle amplitude: {}", e)))?;
        let positions = points
            .positions()
            .iter()
            .map(|p| {
                p + Vector3::new(
                    normal.sample(&mut self.rng),
                    normal.sample(&mut self.rng),
                    normal.sample(&mut self.rng),
                )
            })
            .collect();
        points.with_positions(positions)
    }

    /// Random rotation, translation and in-class shuffle, with the ground
    /// truth needed to check an alignment.
    pub fn perturb(
        &mut self,
        points: &PointSet,
        max_shift: f64,
    ) -> Result<(PointSet, GroundTruth)> {
        let rotation = self.random_rotation();
        let shift = Vector3::from_fn(|_, _| {
            let u: f64 = StandardNormal.sample(&mut self.rng);
            u.clamp(-1.0, 1.0) * max_shift
        });
        let transform = RigidTransform {
            rotation,
            translation: shift,
        };
        let moved = Self::apply(points, &transform)?;
        let (shuffled, permutation) = self.shuffle_within_types(&moved)?;
        Ok((
            shuffled,
            GroundTruth {
                transform,
                permutation,
                inverted: false,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample() -> PointSet {
        PointSet::from_coords(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 3.0]],
            vec![0, 1, 0, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_random_rotation_is_proper() {
        let mut t = ConfigurationTransformer::new(9);
        for _ in 0..5 {
            let r = t.random_rotation();
            assert_abs_diff_eq!(r.determinant(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!((r * r.transpose() - Matrix3::identity()).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shuffle_keeps_labels_and_reports_permutation() {
        let mut t = ConfigurationTransformer::new(4);
        let points = sample();
        let (shuffled, permutation) = t.shuffle_within_types(&points).unwrap();
        assert_eq!(shuffled.labels(), points.labels());
        for (i, &j) in permutation.iter().enumerate() {
            assert_eq!(points.positions()[i], shuffled.positions()[j]);
            assert_eq!(points.labels()[i], shuffled.labels()[j]);
        }
    }

    #[test]
    fn test_perturb_ground_truth_maps_source_onto_copy() {
        let mut t = ConfigurationTransformer::new(21);
        let points = sample();
        let (copy, truth) = t.perturb(&points, 2.0).unwrap();
        for (i, p) in points.positions().iter().enumerate() {
            let expected = truth.transform.apply(p);
            let actual = copy.positions()[truth.permutation[i]];
            assert_abs_diff_eq!((expected - actual).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rattle_rejects_negative_sigma() {
        let mut t = ConfigurationTransformer::new(0);
        assert!(t.rattle(&sample(), -1.0).is_err());
    }

    #[test]
    fn test_invert_and_wrap() {
        let cell = PeriodicBox::cubic(2.5).unwrap();
        let inverted = ConfigurationTransformer::invert(&sample()).unwrap();
        assert_eq!(inverted.positions()[3], Vector3::new(0.0, 0.0, -3.0));
        let wrapped = ConfigurationTransformer::wrap(&inverted, &cell).unwrap();
        assert_abs_diff_eq!(wrapped.positions()[3].z, 2.0, epsilon = 1e-12);
    }
}
