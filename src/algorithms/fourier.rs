//! FFT plumbing shared by the overlap evaluators.

use ndarray::{Array, ArrayD, Axis, Dimension, IxDyn};
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `X[k] = Σ x[n] exp(-2πi nk/N)`
    Forward,
    /// `x[n] = Σ X[k] exp(+2πi nk/N)`, without the `1/N` factor
    Inverse,
}

/// In-place multidimensional FFT, one axis at a time.
pub fn fft_nd<D: Dimension>(data: &mut Array<Complex64, D>, direction: Direction) {
    let mut planner = FftPlanner::new();
    for axis in 0..data.ndim() {
        let len = data.len_of(Axis(axis));
        if len < 2 {
            continue;
        }
        let fft = match direction {
            Direction::Forward => planner.plan_fft_forward(len),
            Direction::Inverse => planner.plan_fft_inverse(len),
        };
        let mut buffer = vec![Complex64::new(0.0, 0.0); len];
        for mut lane in data.lanes_mut(Axis(axis)) {
            for (dst, src) in buffer.iter_mut().zip(lane.iter()) {
                *dst = *src;
            }
            fft.process(&mut buffer);
            for (dst, src) in lane.iter_mut().zip(buffer.iter()) {
                *dst = *src;
            }
        }
    }
}

/// Map a signed frequency onto its FFT bin for a transform of length `n`.
#[inline]
pub fn frequency_bin(freq: i64, n: usize) -> usize {
    freq.rem_euclid(n as i64) as usize
}

/// How an axis behaves at its ends when looking for neighbours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Periodic,
    Clamped,
}

/// Indices of local maxima of a real grid, best first.
///
/// A point is a maximum when no neighbour in its 3^d neighbourhood is
/// strictly larger. Ties in value are ordered by ascending flat index.
pub fn local_maxima(scores: &ArrayD<f64>, boundaries: &[Boundary]) -> Vec<(Vec<usize>, f64)> {
    let shape = scores.shape().to_vec();
    assert_eq!(shape.len(), boundaries.len(), "one boundary per axis");
    let ndim = shape.len();

    let mut peaks: Vec<(usize, Vec<usize>, f64)> = Vec::new();
    for (flat, (index, &value)) in scores.indexed_iter().enumerate() {
        let index = index.slice().to_vec();
        if is_local_max(scores, &shape, boundaries, &index, value, ndim) {
            peaks.push((flat, index, value));
        }
    }

    peaks.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    peaks.into_iter().map(|(_, idx, value)| (idx, value)).collect()
}

fn is_local_max(
    scores: &ArrayD<f64>,
    shape: &[usize],
    boundaries: &[Boundary],
    index: &[usize],
    value: f64,
    ndim: usize,
) -> bool {
    let neighbours = 3usize.pow(ndim as u32);
    let mut probe = vec![0usize; ndim];
    for code in 0..neighbours {
        let mut rest = code;
        let mut valid = true;
        let mut is_self = true;
        for axis in 0..ndim {
            let offset = (rest % 3) as i64 - 1;
            rest /= 3;
            if offset != 0 {
                is_self = false;
            }
            let len = shape[axis] as i64;
            let pos = index[axis] as i64 + offset;
            probe[axis] = match boundaries[axis] {
                Boundary::Periodic => pos.rem_euclid(len) as usize,
                Boundary::Clamped => {
                    if pos < 0 || pos >= len {
                        valid = false;
                        0
                    } else {
                        pos as usize
                    }
                }
            };
        }
        if is_self || !valid {
            continue;
        }
        if scores[IxDyn(&probe)] > value {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    #[test]
    fn test_forward_then_inverse_scales_by_length() {
        let original: Array2<Complex64> =
            Array2::from_shape_fn((4, 6), |(i, j)| Complex64::new((i * 6 + j) as f64, i as f64));
        let mut data = original.clone();
        fft_nd(&mut data, Direction::Forward);
        fft_nd(&mut data, Direction::Inverse);
        for (a, b) in data.iter().zip(original.iter()) {
            assert_abs_diff_eq!(a.re, b.re * 24.0, epsilon = 1e-9);
            assert_abs_diff_eq!(a.im, b.im * 24.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_inverse_fft_of_single_bin_is_plane_wave() {
        let n = 8;
        let mut data = Array1::from_elem(n, Complex64::new(0.0, 0.0));
        data[frequency_bin(-1, n)] = Complex64::new(1.0, 0.0);
        fft_nd(&mut data, Direction::Inverse);
        for (k, value) in data.iter().enumerate() {
            let phase = -2.0 * std::f64::consts::PI * k as f64 / n as f64;
            assert_abs_diff_eq!(value.re, phase.cos(), epsilon = 1e-12);
            assert_abs_diff_eq!(value.im, phase.sin(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_frequency_bin_wraps_negative() {
        assert_eq!(frequency_bin(0, 5), 0);
        assert_eq!(frequency_bin(-1, 5), 4);
        assert_eq!(frequency_bin(2, 5), 2);
    }

    #[test]
    fn test_local_maxima_periodic_vs_clamped() {
        let scores = Array1::from(vec![5.0, 1.0, 2.0, 1.0, 4.0]).into_dyn();
        let periodic = local_maxima(&scores, &[Boundary::Periodic]);
        let idx: Vec<usize> = periodic.iter().map(|(i, _)| i[0]).collect();
        assert_eq!(idx, vec![0, 2]);

        let clamped = local_maxima(&scores, &[Boundary::Clamped]);
        let idx: Vec<usize> = clamped.iter().map(|(i, _)| i[0]).collect();
        assert_eq!(idx, vec![0, 4, 2]);
    }

    #[test]
    fn test_plateau_ties_ordered_by_index() {
        let scores = Array1::from(vec![3.0, 3.0, 0.0, 3.0]).into_dyn();
        let peaks = local_maxima(&scores, &[Boundary::Clamped]);
        let idx: Vec<usize> = peaks.iter().map(|(i, _)| i[0]).collect();
        assert_eq!(idx, vec![0, 1, 3]);
    }
}
