//! Exact minimum-cost perfect matching (Hungarian algorithm).
//!
//! Shortest augmenting paths with row/column potentials, O(n³). Columns are
//! scanned in ascending order and the first strict minimum wins, so results
//! are deterministic for a given matrix.

use crate::geometry::{self, PeriodicBox};
use crate::pipeline::PermutationGroups;
use nalgebra::Vector3;
use ndarray::Array2;
use rayon::prelude::*;

/// Square matrix of non-negative assignment costs
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    costs: Array2<f64>,
}

impl CostMatrix {
    /// Panics if `costs` is not square.
    pub fn new(costs: Array2<f64>) -> Self {
        let (rows, cols) = costs.dim();
        assert_eq!(rows, cols, "cost matrix must be square, got {}x{}", rows, cols);
        Self { costs }
    }

    pub fn from_fn<F: FnMut(usize, usize) -> f64>(n: usize, mut f: F) -> Self {
        Self {
            costs: Array2::from_shape_fn((n, n), |(i, j)| f(i, j)),
        }
    }

    /// Squared (minimum-image) distances between two point subsets.
    pub fn squared_distances(
        xs: &[Vector3<f64>],
        ys: &[Vector3<f64>],
        cell: Option<&PeriodicBox>,
    ) -> Self {
        assert_eq!(xs.len(), ys.len(), "cost matrix needs equal-size subsets");
        Self::from_fn(xs.len(), |i, j| geometry::squared_distance(&xs[i], &ys[j], cell))
    }

    pub fn size(&self) -> usize {
        self.costs.nrows()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.costs[[row, col]]
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.costs
    }
}

/// Optimal bijection for one cost matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// `permutation[row] = col`
    pub permutation: Vec<usize>,
    pub cost: f64,
}

pub fn solve(matrix: &CostMatrix) -> Assignment {
    let n = matrix.size();
    if n == 0 {
        return Assignment {
            permutation: Vec::new(),
            cost: 0.0,
        };
    }
    let a = matrix.as_array();

    // 1-based potentials; index 0 is the virtual source column
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut row_of = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for row in 1..=n {
        row_of[0] = row;
        let mut col0 = 0usize;
        let mut min_reduced = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[col0] = true;
            let row0 = row_of[col0];
            let mut delta = f64::INFINITY;
            let mut col1 = 0usize;

            for col in 1..=n {
                if used[col] {
                    continue;
                }
                let reduced = a[[row0 - 1, col - 1]] - u[row0] - v[col];
                if reduced < min_reduced[col] {
                    min_reduced[col] = reduced;
                    way[col] = col0;
                }
                if min_reduced[col] < delta {
                    delta = min_reduced[col];
                    col1 = col;
                }
            }

            assert!(col1 != 0, "assignment costs must be finite");

            for col in 0..=n {
                if used[col] {
                    u[row_of[col]] += delta;
                    v[col] -= delta;
                } else {
                    min_reduced[col] -= delta;
                }
            }

            col0 = col1;
            if row_of[col0] == 0 {
                break;
            }
        }

        // Flip the augmenting path back to the source
        loop {
            let prev = way[col0];
            row_of[col0] = row_of[prev];
            col0 = prev;
            if col0 == 0 {
                break;
            }
        }
    }

    let mut permutation = vec![0usize; n];
    for col in 1..=n {
        permutation[row_of[col] - 1] = col - 1;
    }
    let cost = permutation
        .iter()
        .enumerate()
        .map(|(row, &col)| a[[row, col]])
        .sum();

    Assignment { permutation, cost }
}

/// Solve one assignment problem per type class.
///
/// `xs` and `ys` are the full configurations (already transformed as
/// required); `groups1` and `groups2` must be compatible. Returns the global
/// permutation and the total cost.
pub fn assign_by_type(
    xs: &[Vector3<f64>],
    ys: &[Vector3<f64>],
    groups1: &PermutationGroups,
    groups2: &PermutationGroups,
    cell: Option<&PeriodicBox>,
) -> (Vec<usize>, f64) {
    let matrix_for = |g1: &Vec<usize>, g2: &Vec<usize>| {
        CostMatrix::from_fn(g1.len(), |i, j| {
            geometry::squared_distance(&xs[g1[i]], &ys[g2[j]], cell)
        })
    };
    assign_with(xs.len(), groups1, groups2, matrix_for)
}

/// Like [`assign_by_type`] but with caller-built cost matrices per class.
pub fn assign_with<F>(
    n: usize,
    groups1: &PermutationGroups,
    groups2: &PermutationGroups,
    matrix_for: F,
) -> (Vec<usize>, f64)
where
    F: Fn(&Vec<usize>, &Vec<usize>) -> CostMatrix + Sync,
{
    let solved: Vec<Assignment> = groups1
        .groups()
        .par_iter()
        .zip(groups2.groups().par_iter())
        .map(|(g1, g2)| solve(&matrix_for(g1, g2)))
        .collect();

    let mut permutation = vec![0usize; n];
    let mut total = 0.0;
    for ((g1, g2), assignment) in groups1
        .groups()
        .iter()
        .zip(groups2.groups())
        .zip(&solved)
    {
        for (i, &j) in assignment.permutation.iter().enumerate() {
            permutation[g1[i]] = g2[j];
        }
        total += assignment.cost;
    }
    (permutation, total)
}
