//! Plane-wave overlap search for configurations in a periodic box.
//!
//! Each type class is summarized by its structure factors
//! `C(n) = Σ_j exp(-i k_n · r_j)` with `k_n = 2π n / L`, `|n_a| <= K`. The
//! Gaussian-smoothed overlap after translating the first configuration by `d`
//! is `Σ_n exp(-σ²|k_n|²/2) C1(n) conj(C2(n)) exp(-i k_n · d)`, which one
//! forward FFT evaluates on a whole `M³` grid of displacements.

use crate::algorithms::fourier::{self, Boundary, Direction};
use crate::config::PeriodicConfig;
use crate::geometry::PeriodicBox;
use crate::pipeline::{
    Candidate, HarmonicCoefficients, HarmonicTransform, PointSet, RigidTransform,
};
use crate::{AlignError, Result};
use nalgebra::Vector3;
use ndarray::{Array3, Array4, Axis};
use num_complex::Complex64;
use rayon::prelude::*;
use std::f64::consts::PI;
use tracing::debug;

/// Structure factors of one configuration, per type class
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicCoefficients {
    pub cell: PeriodicBox,
    pub cutoff: usize,
    pub labels: Vec<u32>,
    pub counts: Vec<usize>,
    /// `data[[class, nx + K, ny + K, nz + K]]`
    pub data: Array4<Complex64>,
}

impl PeriodicCoefficients {
    /// Coefficients of the point-inverted configuration `r -> -r`.
    pub fn inverted(&self) -> Self {
        Self {
            data: self.data.mapv(|c| c.conj()),
            ..self.clone()
        }
    }
}

pub struct PeriodicFourier {
    cell: PeriodicBox,
    cutoff: usize,
    width: f64,
    grid_size: usize,
}

impl PeriodicFourier {
    pub fn new(cell: PeriodicBox, config: &PeriodicConfig) -> Result<Self> {
        if config.cutoff == 0 {
            return Err(AlignError::DimensionError(
                "periodic cutoff must be at least 1".to_string(),
            ));
        }
        if !(config.width.is_finite() && config.width > 0.0) {
            return Err(AlignError::DimensionError(format!(
                "Gaussian width must be positive, got {}",
                config.width
            )));
        }
        let minimum_grid = 2 * config.cutoff + 1;
        let grid_size = match config.grid_size {
            Some(size) => size,
            None => config.oversampling.max(1) * minimum_grid,
        };
        if grid_size < minimum_grid {
            return Err(AlignError::DimensionError(format!(
                "translation grid of {} points cannot resolve cutoff {} (need at least {})",
                grid_size, config.cutoff, minimum_grid
            )));
        }
        Ok(Self {
            cell,
            cutoff: config.cutoff,
            width: config.width,
            grid_size,
        })
    }

    pub fn cell(&self) -> &PeriodicBox {
        &self.cell
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    fn side(&self) -> usize {
        2 * self.cutoff + 1
    }

    fn wave_vector(&self, n: [i64; 3]) -> Vector3<f64> {
        Vector3::from_fn(|axis, _| 2.0 * PI * n[axis] as f64 / self.cell.length(axis))
    }

    /// `exp(-i k_n x_axis)` for `n` in `-K..=K`
    fn phase_table(&self, coordinate: f64, axis: usize) -> Vec<Complex64> {
        let k = self.cutoff as i64;
        (-k..=k)
            .map(|n| {
                let phase = -2.0 * PI * n as f64 * coordinate / self.cell.length(axis);
                Complex64::from_polar(1.0, phase)
            })
            .collect()
    }

    fn class_factors(&self, points: &PointSet, members: &[usize]) -> Array3<Complex64> {
        let side = self.side();
        let mut factors = Array3::<Complex64>::zeros((side, side, side));
        for &i in members {
            let p = points.positions()[i];
            let ex = self.phase_table(p.x, 0);
            let ey = self.phase_table(p.y, 1);
            let ez = self.phase_table(p.z, 2);
            for a in 0..side {
                for b in 0..side {
                    let exy = ex[a] * ey[b];
                    for c in 0..side {
                        factors[[a, b, c]] += exy * ez[c];
                    }
                }
            }
        }
        factors
    }

    fn unpack<'a>(&self, coefficients: &'a HarmonicCoefficients) -> Result<&'a PeriodicCoefficients> {
        match coefficients {
            HarmonicCoefficients::Periodic(c) => {
                if c.cutoff != self.cutoff || c.cell != self.cell {
                    return Err(AlignError::DimensionError(format!(
                        "coefficients computed for cutoff {} in {:?}, aligner uses cutoff {} in {:?}",
                        c.cutoff,
                        c.cell.lengths(),
                        self.cutoff,
                        self.cell.lengths()
                    )));
                }
                Ok(c)
            }
            HarmonicCoefficients::Spherical(_) => Err(AlignError::DimensionError(
                "spherical coefficients passed to a periodic aligner".to_string(),
            )),
        }
    }
}

impl HarmonicTransform for PeriodicFourier {
    fn name(&self) -> &str {
        "PeriodicFourier"
    }

    fn compute_coefficients(&self, points: &PointSet) -> Result<HarmonicCoefficients> {
        let groups = points.groups();
        let side = self.side();

        let per_class: Vec<Array3<Complex64>> = groups
            .groups()
            .par_iter()
            .map(|members| self.class_factors(points, members))
            .collect();

        let mut data = Array4::<Complex64>::zeros((per_class.len(), side, side, side));
        for (t, factors) in per_class.iter().enumerate() {
            data.index_axis_mut(Axis(0), t).assign(factors);
        }

        debug!(
            classes = per_class.len(),
            cutoff = self.cutoff,
            points = points.len(),
            "Computed periodic structure factors"
        );

        Ok(HarmonicCoefficients::Periodic(PeriodicCoefficients {
            cell: self.cell,
            cutoff: self.cutoff,
            labels: groups.labels().to_vec(),
            counts: groups.counts(),
            data,
        }))
    }

    fn evaluate(
        &self,
        first: &HarmonicCoefficients,
        second: &HarmonicCoefficients,
        max_candidates: usize,
    ) -> Result<Vec<Candidate>> {
        let c1 = self.unpack(first)?;
        let c2 = self.unpack(second)?;
        if c1.labels != c2.labels || c1.counts != c2.counts {
            return Err(AlignError::ShapeMismatch(format!(
                "coefficient type classes differ: {:?} vs {:?}",
                c1.counts, c2.counts
            )));
        }

        let k = self.cutoff as i64;
        let side = self.side();
        let m = self.grid_size;
        let mut grid = Array3::<Complex64>::zeros((m, m, m));
        for a in 0..side {
            for b in 0..side {
                for c in 0..side {
                    let n = [a as i64 - k, b as i64 - k, c as i64 - k];
                    let k2 = self.wave_vector(n).norm_squared();
                    let weight = (-0.5 * self.width * self.width * k2).exp();
                    let mut product = Complex64::new(0.0, 0.0);
                    for t in 0..c1.labels.len() {
                        product += c1.data[[t, a, b, c]] * c2.data[[t, a, b, c]].conj();
                    }
                    grid[[
                        fourier::frequency_bin(n[0], m),
                        fourier::frequency_bin(n[1], m),
                        fourier::frequency_bin(n[2], m),
                    ]] += product * weight;
                }
            }
        }

        fourier::fft_nd(&mut grid, Direction::Forward);
        let scores = grid.mapv(|z| z.re).into_dyn();
        let peaks = fourier::local_maxima(&scores, &[Boundary::Periodic; 3]);

        let candidates: Vec<Candidate> = peaks
            .into_iter()
            .take(max_candidates)
            .map(|(index, score)| {
                let shift = Vector3::from_fn(|axis, _| {
                    self.cell.length(axis) * index[axis] as f64 / m as f64
                });
                Candidate {
                    transform: RigidTransform::translation(self.cell.minimum_image(shift)),
                    score,
                    grid_index: (index[0] * m + index[1]) * m + index[2],
                }
            })
            .collect();

        debug!(
            grid = m,
            candidates = candidates.len(),
            best_score = candidates.first().map(|c| c.score),
            "Ranked periodic translation candidates"
        );
        Ok(candidates)
    }

    fn fingerprint(&self) -> String {
        format!(
            "periodic:{:?}:{}:{}:{}",
            self.cell.lengths(),
            self.cutoff,
            self.width,
            self.grid_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn transform(length: f64) -> PeriodicFourier {
        let config = PeriodicConfig {
            cutoff: 4,
            width: 0.4,
            oversampling: 2,
            grid_size: None,
        };
        PeriodicFourier::new(PeriodicBox::cubic(length).unwrap(), &config).unwrap()
    }

    #[test]
    fn test_rejects_grid_below_nyquist() {
        let config = PeriodicConfig {
            cutoff: 4,
            width: 0.4,
            oversampling: 1,
            grid_size: Some(8),
        };
        let result = PeriodicFourier::new(PeriodicBox::cubic(3.0).unwrap(), &config);
        assert!(matches!(result, Err(AlignError::DimensionError(_))));
    }

    #[test]
    fn test_zero_frequency_counts_points() {
        let fourier = transform(4.0);
        let points = PointSet::from_coords(
            &[[0.1, 0.2, 0.3], [1.0, 2.0, 3.0], [2.5, 0.5, 1.5]],
            vec![0, 0, 1],
        )
        .unwrap();
        let coefficients = fourier.compute_coefficients(&points).unwrap();
        let HarmonicCoefficients::Periodic(c) = coefficients else {
            panic!("expected periodic coefficients");
        };
        let k = c.cutoff;
        assert_abs_diff_eq!(c.data[[0, k, k, k]].re, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.data[[1, k, k, k]].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_coefficients_invariant_under_lattice_shift() {
        let fourier = transform(4.0);
        let a = PointSet::from_coords(&[[0.1, 0.2, 0.3], [1.0, 2.0, 3.0]], vec![0, 0]).unwrap();
        let b = PointSet::from_coords(&[[4.1, -3.8, 0.3], [1.0, 2.0, 7.0]], vec![0, 0]).unwrap();
        let ca = fourier.compute_coefficients(&a).unwrap();
        let cb = fourier.compute_coefficients(&b).unwrap();
        let (HarmonicCoefficients::Periodic(ca), HarmonicCoefficients::Periodic(cb)) = (ca, cb) else {
            panic!("expected periodic coefficients");
        };
        for (x, y) in ca.data.iter().zip(cb.data.iter()) {
            assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_best_candidate_is_applied_shift() {
        let fourier = transform(6.0);
        let a = PointSet::from_coords(
            &[[0.5, 0.5, 0.5], [3.0, 1.0, 4.0], [1.5, 4.5, 2.0], [5.0, 3.0, 1.0]],
            vec![0, 0, 1, 1],
        )
        .unwrap();
        // Shift by exactly three grid steps on x (grid of 18 over 6.0)
        let shift = Vector3::new(1.0, 0.0, 0.0);
        let b = a
            .with_positions(a.positions().iter().map(|p| p + shift).collect())
            .unwrap();
        let ca = fourier.compute_coefficients(&a).unwrap();
        let cb = fourier.compute_coefficients(&b).unwrap();
        let candidates = fourier.evaluate(&ca, &cb, 5).unwrap();
        let best = candidates[0].transform.translation;
        assert_abs_diff_eq!((best - shift).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_spherical_coefficients_are_rejected() {
        use crate::algorithms::SphericalHarmonics;
        use crate::config::SphericalConfig;
        let fourier = transform(4.0);
        let spherical = SphericalHarmonics::new(&SphericalConfig {
            jmax: 2,
            ..SphericalConfig::default()
        })
        .unwrap();
        let points = PointSet::from_coords(&[[0.0, 0.0, 1.0]], vec![0]).unwrap();
        let wrong = spherical.compute_coefficients(&points).unwrap();
        let right = fourier.compute_coefficients(&points).unwrap();
        assert!(matches!(
            fourier.evaluate(&wrong, &right, 1),
            Err(AlignError::DimensionError(_))
        ));
    }
}
