use crate::geometry::{squared_distance, PeriodicBox};
use crate::pipeline::PointSet;
use crate::{AlignError, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_ATTEMPTS_PER_POINT: usize = 10_000;

/// Seeded random clusters for tests and benchmarks
pub struct ClusterGenerator {
    rng: StdRng,
    min_separation: f64,
}

impl ClusterGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            min_separation: 0.0,
        }
    }

    /// Reject placements closer than `distance` to an existing point.
    pub fn with_min_separation(mut self, distance: f64) -> Self {
        self.min_separation = distance;
        self
    }

    /// Points uniform in a ball of `radius` about the origin; `counts[t]`
    /// points get label `t`.
    pub fn ball(&mut self, counts: &[usize], radius: f64) -> Result<PointSet> {
        self.place(counts, None, |rng| loop {
            let p = Vector3::new(
                rng.gen_range(-radius..=radius),
                rng.gen_range(-radius..=radius),
                rng.gen_range(-radius..=radius),
            );
            if p.norm() <= radius {
                return p;
            }
        })
    }

    /// Points uniform in the primary cell of `cell`, separated under the
    /// minimum image.
    pub fn periodic(&mut self, counts: &[usize], cell: &PeriodicBox) -> Result<PointSet> {
        let lengths = cell.lengths();
        self.place(counts, Some(cell), |rng| {
            Vector3::new(
                rng.gen_range(0.0..lengths[0]),
                rng.gen_range(0.0..lengths[1]),
                rng.gen_range(0.0..lengths[2]),
            )
        })
    }

    fn place<F>(&mut self, counts: &[usize], cell: Option<&PeriodicBox>, mut sample: F) -> Result<PointSet>
    where
        F: FnMut(&mut StdRng) -> Vector3<f64>,
    {
        let total: usize = counts.iter().sum();
        let min_sq = self.min_separation * self.min_separation;
        let mut positions: Vec<Vector3<f64>> = Vec::with_capacity(total);
        let mut labels = Vec::with_capacity(total);

        for (label, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                let mut placed = false;
                for _ in 0..MAX_ATTEMPTS_PER_POINT {
                    let candidate = sample(&mut self.rng);
                    if positions
                        .iter()
                        .all(|p| squared_distance(p, &candidate, cell) >= min_sq)
                    {
                        positions.push(candidate);
                        labels.push(label as u32);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    return Err(AlignError::DimensionError(format!(
                        "could not place point {} of {} with separation {}",
                        positions.len() + 1,
                        total,
                        self.min_separation
                    )));
                }
            }
        }

        PointSet::new(positions, labels)
    }
}
