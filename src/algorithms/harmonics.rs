//! Spherical harmonics, sphere quadrature and rotation matrices of the
//! harmonic basis.
//!
//! Harmonics are the orthonormal complex `Y_lm` with the Condon-Shortley
//! phase. For a rotation `R`, the matrix `M^l(R)` is defined by
//! `Y_lm(R u) = Σ_m' M^l_{mm'}(R) Y_lm'(u)`; it is a homomorphism,
//! `M(AB) = M(A) M(B)`, and `M(Rz(a))` is `diag(exp(i m a))`.

use crate::geometry::rotation_y;
use nalgebra::Vector3;
use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Flat index of `(l, m)` with `-l <= m <= l`.
#[inline]
pub fn lm_index(l: usize, m: i64) -> usize {
    ((l * l + l) as i64 + m) as usize
}

#[inline]
pub fn harmonic_count(lmax: usize) -> usize {
    (lmax + 1) * (lmax + 1)
}

/// `Y_lm(u / |u|)` for every `l <= lmax`, indexed by [`lm_index`].
///
/// The zero vector has no direction; it is treated as isotropic and only the
/// `l = 0` term is non-zero.
pub fn spherical_harmonics(lmax: usize, u: &Vector3<f64>) -> Vec<Complex64> {
    let mut out = vec![Complex64::new(0.0, 0.0); harmonic_count(lmax)];
    let y00 = 1.0 / (4.0 * PI).sqrt();
    let r = u.norm();
    if r < 1e-12 {
        out[0] = Complex64::new(y00, 0.0);
        return out;
    }

    let cos_t = (u.z / r).clamp(-1.0, 1.0);
    let sin_t = (u.x * u.x + u.y * u.y).sqrt() / r;
    let phi = u.y.atan2(u.x);

    // Normalized associated Legendre functions, p[l][m] for m >= 0
    let mut p = Array2::<f64>::zeros((lmax + 1, lmax + 1));
    p[[0, 0]] = y00;
    for m in 1..=lmax {
        let mf = m as f64;
        p[[m, m]] = -((2.0 * mf + 1.0) / (2.0 * mf)).sqrt() * sin_t * p[[m - 1, m - 1]];
    }
    for m in 0..lmax {
        p[[m + 1, m]] = (2.0 * m as f64 + 3.0).sqrt() * cos_t * p[[m, m]];
    }
    for m in 0..=lmax {
        let mf = m as f64;
        for l in (m + 2)..=lmax {
            let lf = l as f64;
            let a = ((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf)).sqrt();
            let b = (((lf - 1.0) * (lf - 1.0) - mf * mf) / (4.0 * (lf - 1.0) * (lf - 1.0) - 1.0))
                .sqrt();
            p[[l, m]] = a * (cos_t * p[[l - 1, m]] - b * p[[l - 2, m]]);
        }
    }

    for l in 0..=lmax {
        for m in 0..=l {
            let value = Complex64::from_polar(p[[l, m]], m as f64 * phi);
            out[lm_index(l, m as i64)] = value;
            if m > 0 {
                let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
                out[lm_index(l, -(m as i64))] = value.conj() * sign;
            }
        }
    }
    out
}

/// Gauss-Legendre nodes and weights on `[-1, 1]`.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..n {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut derivative = 1.0;
        for _ in 0..100 {
            let (p_n, p_prev) = legendre_pair(n, x);
            derivative = n as f64 * (x * p_n - p_prev) / (x * x - 1.0);
            let step = p_n / derivative;
            x -= step;
            if step.abs() < 1e-15 {
                break;
            }
        }
        nodes[i] = x;
        weights[i] = 2.0 / ((1.0 - x * x) * derivative * derivative);
    }
    (nodes, weights)
}

/// `(P_n(x), P_{n-1}(x))`
fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    let mut prev = 1.0;
    let mut current = x;
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 2..=n {
        let kf = k as f64;
        let next = ((2.0 * kf - 1.0) * x * current - (kf - 1.0) * prev) / kf;
        prev = current;
        current = next;
    }
    (current, prev)
}

/// Product quadrature on the unit sphere, exact for band limit `2 * lmax`
#[derive(Debug, Clone)]
pub struct SphereQuadrature {
    pub directions: Vec<Vector3<f64>>,
    pub weights: Vec<f64>,
}

impl SphereQuadrature {
    pub fn new(lmax: usize) -> Self {
        let (nodes, gl_weights) = gauss_legendre(lmax + 1);
        let n_phi = 2 * lmax + 2;
        let dphi = 2.0 * PI / n_phi as f64;

        let mut directions = Vec::with_capacity(nodes.len() * n_phi);
        let mut weights = Vec::with_capacity(nodes.len() * n_phi);
        for (cos_t, w) in nodes.iter().zip(gl_weights.iter()) {
            let sin_t = (1.0 - cos_t * cos_t).max(0.0).sqrt();
            for k in 0..n_phi {
                let phi = k as f64 * dphi;
                directions.push(Vector3::new(sin_t * phi.cos(), sin_t * phi.sin(), *cos_t));
                weights.push(w * dphi);
            }
        }
        Self {
            directions,
            weights,
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Harmonic rotation blocks `M^l(Ry(beta))` on a grid of `beta` values
#[derive(Debug, Clone)]
pub struct RotationTable {
    lmax: usize,
    betas: Vec<f64>,
    /// `blocks[j][l][[m + l, m' + l]]`
    blocks: Vec<Vec<Array2<Complex64>>>,
}

impl RotationTable {
    pub fn new(lmax: usize, betas: Vec<f64>) -> Self {
        let quadrature = SphereQuadrature::new(lmax);
        let reference: Vec<Vec<Complex64>> = quadrature
            .directions
            .iter()
            .map(|u| spherical_harmonics(lmax, u))
            .collect();

        let blocks: Vec<Vec<Array2<Complex64>>> = betas
            .par_iter()
            .map(|&beta| {
                let rotation = rotation_y(beta);
                let mut per_l: Vec<Array2<Complex64>> = (0..=lmax)
                    .map(|l| Array2::zeros((2 * l + 1, 2 * l + 1)))
                    .collect();
                for (q, u) in quadrature.directions.iter().enumerate() {
                    let rotated = spherical_harmonics(lmax, &(rotation * u));
                    let w = quadrature.weights[q];
                    for (l, block) in per_l.iter_mut().enumerate() {
                        let li = l as i64;
                        for m in -li..=li {
                            let lhs = rotated[lm_index(l, m)] * w;
                            for mp in -li..=li {
                                block[[(m + li) as usize, (mp + li) as usize]] +=
                                    lhs * reference[q][lm_index(l, mp)].conj();
                            }
                        }
                    }
                }
                per_l
            })
            .collect();

        Self {
            lmax,
            betas,
            blocks,
        }
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn block(&self, beta_index: usize, l: usize) -> &Array2<Complex64> {
        &self.blocks[beta_index][l]
    }
}
