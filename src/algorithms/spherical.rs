//! Rotational overlap search for finite clusters.
//!
//! Points are centred on their centroid and binned into a fixed number of
//! Gaussian radial shells; each shell of each type class carries harmonic
//! coefficients `c(s, l, m) = Σ_j w_s(|r_j|) conj(Y_lm(r̂_j))`. For a rotation
//! `R = Rz(α) Ry(β) Rz(γ)` the smoothed overlap is
//! `Σ_l Σ_{m,m'} exp(i m α) M^l_{mm'}(β) exp(i m' γ) H^l(m, m')`, so one 2D FFT
//! per tabulated `β` scores the whole `(α, γ)` plane.

use crate::algorithms::fourier::{self, Boundary, Direction};
use crate::algorithms::harmonics::{harmonic_count, lm_index, spherical_harmonics, RotationTable};
use crate::config::SphericalConfig;
use crate::geometry::euler_zyz;
use crate::pipeline::{
    Candidate, HarmonicCoefficients, HarmonicTransform, PointSet, RigidTransform,
};
use crate::{AlignError, Result};
use nalgebra::Vector3;
use ndarray::{Array2, Array3};
use num_complex::Complex64;
use rayon::prelude::*;
use std::f64::consts::PI;
use tracing::debug;

pub const MAX_JMAX: usize = 40;

const NEGLIGIBLE_WEIGHT: f64 = 1e-12;

/// Shell-resolved harmonic coefficients of one centred configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalCoefficients {
    pub jmax: usize,
    pub width: f64,
    pub labels: Vec<u32>,
    pub counts: Vec<usize>,
    /// `data[[class, shell, lm_index(l, m)]]`
    pub data: Array3<Complex64>,
    pub centroid: Vector3<f64>,
}

impl SphericalCoefficients {
    pub fn n_shells(&self) -> usize {
        self.data.shape()[1]
    }

    /// Coefficients of the configuration reflected through its centroid.
    pub fn inverted(&self) -> Self {
        let mut data = self.data.clone();
        for l in (1..=self.jmax).step_by(2) {
            for m in -(l as i64)..=(l as i64) {
                let idx = lm_index(l, m);
                data.slice_mut(ndarray::s![.., .., idx])
                    .mapv_inplace(|c| -c);
            }
        }
        Self {
            data,
            ..self.clone()
        }
    }
}

pub struct SphericalHarmonics {
    jmax: usize,
    width: f64,
    shells: usize,
    n_angle: usize,
    table: RotationTable,
}

impl SphericalHarmonics {
    /// Builds the rotation table for every `β` on the grid, which is the
    /// expensive part; keep the transform around between alignments.
    pub fn new(config: &SphericalConfig) -> Result<Self> {
        if config.jmax == 0 || config.jmax > MAX_JMAX {
            return Err(AlignError::DimensionError(format!(
                "Jmax must be in 1..={}, got {}",
                MAX_JMAX, config.jmax
            )));
        }
        if !(config.width.is_finite() && config.width > 0.0) {
            return Err(AlignError::DimensionError(format!(
                "Gaussian width must be positive, got {}",
                config.width
            )));
        }
        if config.oversampling == 0 {
            return Err(AlignError::DimensionError(
                "angular oversampling must be at least 1".to_string(),
            ));
        }
        if config.shells == 0 {
            return Err(AlignError::DimensionError(
                "at least one radial shell is required".to_string(),
            ));
        }

        let n_angle = config.oversampling * (2 * config.jmax + 1);
        let n_beta = config.oversampling * config.jmax + 1;
        let betas = (0..n_beta)
            .map(|j| PI * j as f64 / (n_beta - 1) as f64)
            .collect();
        let table = RotationTable::new(config.jmax, betas);

        debug!(
            jmax = config.jmax,
            n_angle, n_beta, "Tabulated harmonic rotation matrices"
        );

        Ok(Self {
            jmax: config.jmax,
            width: config.width,
            shells: config.shells,
            n_angle,
            table,
        })
    }

    pub fn jmax(&self) -> usize {
        self.jmax
    }

    pub fn shells(&self) -> usize {
        self.shells
    }

    /// Number of `(α, β, γ)` grid points scored per evaluation.
    pub fn grid_points(&self) -> usize {
        self.n_angle * self.n_angle * self.table.betas().len()
    }

    /// Angular damping of shell `s` at degree `l`; the shell radius `sσ` is
    /// floored at `σ` so the innermost shells stay finite.
    fn angular_weight(shell: usize, l: usize) -> f64 {
        let radius = shell.max(1) as f64;
        let lf = l as f64;
        (-lf * (lf + 1.0) / (2.0 * radius * radius)).exp()
    }

    fn unpack<'a>(
        &self,
        coefficients: &'a HarmonicCoefficients,
    ) -> Result<&'a SphericalCoefficients> {
        match coefficients {
            HarmonicCoefficients::Spherical(c) => {
                if c.jmax != self.jmax || c.width != self.width || c.n_shells() != self.shells {
                    return Err(AlignError::DimensionError(format!(
                        "coefficients computed with Jmax {}, width {} and {} shells, aligner uses Jmax {}, width {} and {} shells",
                        c.jmax,
                        c.width,
                        c.n_shells(),
                        self.jmax,
                        self.width,
                        self.shells
                    )));
                }
                Ok(c)
            }
            HarmonicCoefficients::Periodic(_) => Err(AlignError::DimensionError(
                "periodic coefficients passed to a spherical aligner".to_string(),
            )),
        }
    }

    /// `H^l(m, m') = Σ_{t,s} a(s,l) conj(c1(t,s,l,m')) c2(t,s,l,m)`
    fn correlation_blocks(
        &self,
        c1: &SphericalCoefficients,
        c2: &SphericalCoefficients,
    ) -> Vec<Array2<Complex64>> {
        let shells = self.shells;
        let classes = c1.labels.len();
        (0..=self.jmax)
            .map(|l| {
                let li = l as i64;
                let size = 2 * l + 1;
                let mut block = Array2::<Complex64>::zeros((size, size));
                for t in 0..classes {
                    for s in 0..shells {
                        let a = Self::angular_weight(s, l);
                        for m in -li..=li {
                            let right = c2.data[[t, s, lm_index(l, m)]] * a;
                            for mp in -li..=li {
                                block[[(m + li) as usize, (mp + li) as usize]] +=
                                    c1.data[[t, s, lm_index(l, mp)]].conj() * right;
                            }
                        }
                    }
                }
                block
            })
            .collect()
    }
}

impl HarmonicTransform for SphericalHarmonics {
    fn name(&self) -> &str {
        "SphericalHarmonics"
    }

    fn compute_coefficients(&self, points: &PointSet) -> Result<HarmonicCoefficients> {
        let groups = points.groups();
        let centroid = points.centroid();
        let centred: Vec<Vector3<f64>> = points.positions().iter().map(|p| p - centroid).collect();
        let n_shells = self.shells;
        let outermost = (n_shells - 1) as f64 * self.width;
        let n_lm = harmonic_count(self.jmax);

        let mut data = Array3::<Complex64>::zeros((groups.labels().len(), n_shells, n_lm));
        for (t, members) in groups.groups().iter().enumerate() {
            for &i in members {
                let r = centred[i].norm().min(outermost);
                let harmonics = spherical_harmonics(self.jmax, &centred[i]);
                for s in 0..n_shells {
                    let offset = (r - s as f64 * self.width) / self.width;
                    let w = (-0.5 * offset * offset).exp();
                    if w < NEGLIGIBLE_WEIGHT {
                        continue;
                    }
                    for (lm, y) in harmonics.iter().enumerate() {
                        data[[t, s, lm]] += y.conj() * w;
                    }
                }
            }
        }

        debug!(
            classes = groups.labels().len(),
            shells = n_shells,
            jmax = self.jmax,
            points = points.len(),
            "Computed spherical harmonic coefficients"
        );

        Ok(HarmonicCoefficients::Spherical(SphericalCoefficients {
            jmax: self.jmax,
            width: self.width,
            labels: groups.labels().to_vec(),
            counts: groups.counts(),
            data,
            centroid,
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

        let correlation = self.correlation_blocks(c1, c2);
        let n = self.n_angle;
        let n_beta = self.table.betas().len();

        let planes: Vec<Array2<f64>> = (0..n_beta)
            .into_par_iter()
            .map(|j| {
                let mut plane = Array2::<Complex64>::zeros((n, n));
                for (l, h) in correlation.iter().enumerate() {
                    let li = l as i64;
                    let rotation = self.table.block(j, l);
                    for m in -li..=li {
                        let row = fourier::frequency_bin(m, n);
                        for mp in -li..=li {
                            let (a, b) = ((m + li) as usize, (mp + li) as usize);
                            plane[[row, fourier::frequency_bin(mp, n)]] += rotation[[a, b]] * h[[a, b]];
                        }
                    }
                }
                fourier::fft_nd(&mut plane, Direction::Inverse);
                plane.mapv(|z| z.re)
            })
            .collect();

        let scores = Array3::from_shape_fn((n, n_beta, n), |(i, j, k)| planes[j][[i, k]]).into_dyn();
        let boundaries = [Boundary::Periodic, Boundary::Clamped, Boundary::Periodic];
        let betas = self.table.betas();
        let step = 2.0 * PI / n as f64;

        // At the poles only α ± γ matters; keep one γ column to avoid duplicates
        let candidates: Vec<Candidate> = fourier::local_maxima(&scores, &boundaries)
            .into_iter()
            .filter(|(index, _)| {
                let pole = index[1] == 0 || index[1] == n_beta - 1;
                !pole || index[2] == 0
            })
            .take(max_candidates)
            .map(|(index, score)| {
                let rotation = euler_zyz(
                    step * index[0] as f64,
                    betas[index[1]],
                    step * index[2] as f64,
                );
                Candidate {
                    transform: RigidTransform::rotation(rotation),
                    score,
                    grid_index: (index[0] * n_beta + index[1]) * n + index[2],
                }
            })
            .collect();

        debug!(
            grid_points = self.grid_points(),
            candidates = candidates.len(),
            best_score = candidates.first().map(|c| c.score),
            "Ranked rotation candidates"
        );
        Ok(candidates)
    }

    fn fingerprint(&self) -> String {
        format!(
            "spherical:{}:{}:{}:{}",
            self.jmax, self.width, self.shells, self.n_angle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{angle_between, rotation_from_axis_angle};
    use approx::assert_abs_diff_eq;

    fn transform(jmax: usize) -> SphericalHarmonics {
        SphericalHarmonics::new(&SphericalConfig {
            jmax,
            width: 0.3,
            oversampling: 2,
            shells: 12,
        })
        .unwrap()
    }

    fn cluster() -> PointSet {
        PointSet::from_coords(
            &[
                [1.0, 0.0, 0.2],
                [-0.4, 1.1, 0.0],
                [0.1, -0.7, 0.9],
                [-0.8, -0.3, -0.6],
                [0.5, 0.6, -1.0],
            ],
            vec![0, 0, 0, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_jmax() {
        for jmax in [0, MAX_JMAX + 1] {
            let result = SphericalHarmonics::new(&SphericalConfig {
                jmax,
                oversampling: 1,
                ..SphericalConfig::default()
            });
            assert!(matches!(result, Err(AlignError::DimensionError(_))));
        }
    }

    #[test]
    fn test_coefficients_invariant_under_translation() {
        let sh = transform(4);
        let points = cluster();
        let shifted = points
            .with_positions(
                points
                    .positions()
                    .iter()
                    .map(|p| p + Vector3::new(3.0, -2.0, 5.0))
                    .collect(),
            )
            .unwrap();
        let HarmonicCoefficients::Spherical(a) = sh.compute_coefficients(&points).unwrap() else {
            panic!("expected spherical coefficients");
        };
        let HarmonicCoefficients::Spherical(b) = sh.compute_coefficients(&shifted).unwrap() else {
            panic!("expected spherical coefficients");
        };
        for (x, y) in a.data.iter().zip(b.data.iter()) {
            assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_identity_ranks_first_for_self_overlap() {
        let sh = transform(6);
        let coefficients = sh.compute_coefficients(&cluster()).unwrap();
        let candidates = sh.evaluate(&coefficients, &coefficients, 4).unwrap();
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].grid_index, 0);
        assert_abs_diff_eq!(
            angle_between(&candidates[0].transform.rotation, &nalgebra::Matrix3::identity()),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_best_candidate_near_applied_rotation() {
        let sh = transform(8);
        let points = cluster();
        let rotation = rotation_from_axis_angle(&Vector3::new(0.3, -0.9, 0.5));
        let rotated = points
            .with_positions(points.positions().iter().map(|p| rotation * p).collect())
            .unwrap();
        let c1 = sh.compute_coefficients(&points).unwrap();
        let c2 = sh.compute_coefficients(&rotated).unwrap();
        let candidates = sh.evaluate(&c1, &c2, 8).unwrap();
        let closest = candidates
            .iter()
            .map(|c| angle_between(&c.transform.rotation, &rotation))
            .fold(f64::INFINITY, f64::min);
        // Grid spacing is 2π / 34 on α and γ
        assert!(closest < 0.5, "closest candidate {} rad away", closest);
    }

    #[test]
    fn test_coefficient_shape_ignores_cluster_extent() {
        let sh = transform(4);
        let points = cluster();
        let mut far = points.positions().to_vec();
        far[0] = Vector3::new(3000.0, 0.0, 0.0);
        let spread = points.with_positions(far).unwrap();

        let near = sh.compute_coefficients(&points).unwrap();
        let distant = sh.compute_coefficients(&spread).unwrap();
        assert_eq!(near.len(), 2 * 12 * harmonic_count(4));
        assert_eq!(distant.len(), near.len());
        assert!(sh.evaluate(&near, &distant, 4).is_ok());
    }

    #[test]
    fn test_rejects_coefficients_with_other_shell_count() {
        let sh = transform(4);
        let other = SphericalHarmonics::new(&SphericalConfig {
            jmax: 4,
            width: 0.3,
            oversampling: 2,
            shells: 5,
        })
        .unwrap();
        let mine = sh.compute_coefficients(&cluster()).unwrap();
        let theirs = other.compute_coefficients(&cluster()).unwrap();
        assert!(matches!(
            sh.evaluate(&mine, &theirs, 1),
            Err(AlignError::DimensionError(_))
        ));
    }

    #[test]
    fn test_inversion_flips_odd_degrees() {
        let sh = transform(3);
        let HarmonicCoefficients::Spherical(c) = sh.compute_coefficients(&cluster()).unwrap() else {
            panic!("expected spherical coefficients");
        };
        let inv = c.inverted();
        let s = 2;
        assert_eq!(inv.data[[0, s, lm_index(2, 1)]], c.data[[0, s, lm_index(2, 1)]]);
        assert_eq!(inv.data[[0, s, lm_index(3, -2)]], -c.data[[0, s, lm_index(3, -2)]]);
    }
}
