//! Branch-and-bound over rotations (axis-angle cube) or periodic translations
//! (fractional cube).
//!
//! Nodes live in an arena and refer to their parent by index. The frontier is
//! a min-heap on lower bounds, so once the smallest open bound cannot beat
//! the incumbent, nothing left can.

use crate::algorithms::hungarian::{assign_with, CostMatrix};
use crate::algorithms::refine::{Refined, Refiner};
use crate::config::SearchConfig;
use crate::geometry::{displacement, rotation_from_axis_angle, transform_points, PeriodicBox};
use crate::pipeline::AlignmentResult;
use crate::Result;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::f64::consts::PI;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Open,
    Expanded,
    Pruned,
    Solved,
}

/// A cubic region of the search space
#[derive(Debug, Clone)]
pub struct SearchNode {
    pub centre: Vector3<f64>,
    pub half_width: f64,
    pub inverted: bool,
    pub lower_bound: f64,
    pub parent: Option<usize>,
    pub depth: usize,
    pub state: NodeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SearchStatus {
    /// The returned distance is the global minimum within tolerance
    Certified,
    /// The budget ran out; the true minimum lies in `[lower_bound, distance]`
    BudgetExhausted { lower_bound: f64 },
    /// Every open cube was solved, but some reached `min_half_width` with a
    /// bound still below the incumbent; the true minimum lies in
    /// `[lower_bound, distance]`
    ResolutionLimited { lower_bound: f64 },
}

impl SearchStatus {
    pub fn is_certified(&self) -> bool {
        matches!(self, SearchStatus::Certified)
    }

    /// Proven lower bound on the optimum when not certified.
    pub fn lower_bound(&self) -> Option<f64> {
        match self {
            SearchStatus::Certified => None,
            SearchStatus::BudgetExhausted { lower_bound }
            | SearchStatus::ResolutionLimited { lower_bound } => Some(*lower_bound),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub result: AlignmentResult,
    pub status: SearchStatus,
    /// Nodes solved before termination
    pub iterations: usize,
    /// Nodes created, pruned ones included
    pub nodes: usize,
}

/// Which space the cubes tile
#[derive(Debug, Clone, Copy)]
pub enum SearchSpace {
    /// Axis-angle vectors in `[-π, π]³`, acting on centred coordinates
    Rotation,
    /// Fractional translations in `[0, 1)³` of the given box
    Translation(PeriodicBox),
}

/// A refined transform and whether the moving set was inverted for it
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub refined: Refined,
    pub inverted: bool,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub best: Solution,
    pub status: SearchStatus,
    pub iterations: usize,
    pub nodes: usize,
}

#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    bound: f64,
    index: usize,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then(self.index.cmp(&other.index))
    }
}

pub struct BranchAndBound<'a> {
    space: SearchSpace,
    proper: Refiner<'a>,
    improper: Option<Refiner<'a>>,
    config: SearchConfig,
}

impl<'a> BranchAndBound<'a> {
    /// `improper` is the same problem with the moving set inverted; pass it to
    /// also search improper alignments.
    pub fn new(
        space: SearchSpace,
        proper: Refiner<'a>,
        improper: Option<Refiner<'a>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            space,
            proper,
            improper,
            config,
        }
    }

    fn refiner(&self, inverted: bool) -> &Refiner<'a> {
        match (&self.improper, inverted) {
            (Some(improper), true) => improper,
            _ => &self.proper,
        }
    }

    fn centre_transform(&self, centre: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
        match self.space {
            SearchSpace::Rotation => (rotation_from_axis_angle(centre), Vector3::zeros()),
            SearchSpace::Translation(cell) => (
                Matrix3::identity(),
                Vector3::from_fn(|axis, _| centre[axis] * cell.length(axis)),
            ),
        }
    }

    /// How far any point can move between the centre transform and any
    /// transform in the cube.
    fn uncertainty(&self, refiner: &Refiner, half_width: f64) -> Vec<f64> {
        match self.space {
            SearchSpace::Rotation => {
                let angle = (3f64.sqrt() * half_width).min(PI);
                let chord = 2.0 * (angle / 2.0).sin();
                refiner.moving.iter().map(|x| chord * x.norm()).collect()
            }
            SearchSpace::Translation(cell) => {
                vec![half_width * cell.diagonal(); refiner.moving.len()]
            }
        }
    }

    fn intersects_space(&self, centre: &Vector3<f64>, half_width: f64) -> bool {
        match self.space {
            SearchSpace::Rotation => centre.norm() - 3f64.sqrt() * half_width <= PI,
            SearchSpace::Translation(_) => true,
        }
    }

    /// Assignment of the distances shrunk by the per-point uncertainty.
    pub fn lower_bound(&self, centre: &Vector3<f64>, half_width: f64, inverted: bool) -> f64 {
        let refiner = self.refiner(inverted);
        let (rotation, translation) = self.centre_transform(centre);
        let moved = transform_points(refiner.moving, &rotation, &translation);
        let slack = self.uncertainty(refiner, half_width);
        let (_, bound) = assign_with(
            moved.len(),
            refiner.groups1,
            refiner.groups2,
            |g1, g2| {
                CostMatrix::from_fn(g1.len(), |i, j| {
                    let d = displacement(&moved[g1[i]], &refiner.fixed[g2[j]], refiner.cell).norm();
                    (d - slack[g1[i]]).max(0.0).powi(2)
                })
            },
        );
        bound
    }

    fn solve_at(&self, centre: &Vector3<f64>, inverted: bool) -> Result<Refined> {
        let refiner = self.refiner(inverted);
        let (rotation, translation) = self.centre_transform(centre);
        match self.space {
            SearchSpace::Rotation => refiner.refine_rotation(&rotation),
            SearchSpace::Translation(_) => Ok(refiner.refine_translation(&rotation, &translation)),
        }
    }

    fn root_regions(&self) -> Vec<(Vector3<f64>, f64, bool)> {
        let divisions = self.config.initial_divisions.max(1);
        let (low, extent) = match self.space {
            SearchSpace::Rotation => (-PI, 2.0 * PI),
            SearchSpace::Translation(_) => (0.0, 1.0),
        };
        let side = extent / divisions as f64;
        let half_width = side / 2.0;
        let mut flags = vec![false];
        if self.improper.is_some() {
            flags.push(true);
        }

        let mut regions = Vec::new();
        for &inverted in &flags {
            for i in 0..divisions {
                for j in 0..divisions {
                    for k in 0..divisions {
                        let centre = Vector3::new(
                            low + (i as f64 + 0.5) * side,
                            low + (j as f64 + 0.5) * side,
                            low + (k as f64 + 0.5) * side,
                        );
                        if self.intersects_space(&centre, half_width) {
                            regions.push((centre, half_width, inverted));
                        }
                    }
                }
            }
        }
        regions
    }

    fn children(&self, node: &SearchNode) -> Vec<(Vector3<f64>, f64, bool)> {
        let half_width = node.half_width / 2.0;
        (0..8)
            .map(|octant| {
                let offset = Vector3::from_fn(|axis, _| {
                    if octant & (1 << axis) == 0 {
                        -half_width
                    } else {
                        half_width
                    }
                });
                (node.centre + offset, half_width, node.inverted)
            })
            .filter(|(centre, hw, _)| self.intersects_space(centre, *hw))
            .collect()
    }

    fn bound_regions(&self, regions: Vec<(Vector3<f64>, f64, bool)>) -> Vec<(Vector3<f64>, f64, bool, f64)> {
        regions
            .into_par_iter()
            .map(|(centre, hw, inverted)| (centre, hw, inverted, self.lower_bound(&centre, hw, inverted)))
            .collect()
    }

    /// Run the search from `incumbent` for at most `budget` solved nodes.
    pub fn search(&self, incumbent: Solution, budget: usize) -> Result<SearchReport> {
        let tolerance = self.config.tolerance;
        let mut best = incumbent;
        let mut arena: Vec<SearchNode> = Vec::new();
        let mut frontier: BinaryHeap<Reverse<FrontierEntry>> = BinaryHeap::new();

        let roots = self.bound_regions(self.root_regions());
        for (centre, half_width, inverted, lower_bound) in roots {
            let index = arena.len();
            let open = lower_bound < best.refined.distance - tolerance;
            arena.push(SearchNode {
                centre,
                half_width,
                inverted,
                lower_bound,
                parent: None,
                depth: 0,
                state: if open { NodeState::Open } else { NodeState::Pruned },
            });
            if open {
                frontier.push(Reverse(FrontierEntry {
                    bound: lower_bound,
                    index,
                }));
            }
        }
        debug!(
            roots = arena.len(),
            open = frontier.len(),
            incumbent = best.refined.distance,
            "Seeded branch-and-bound frontier"
        );

        let mut iterations = 0;
        // Bounds of cubes solved at the resolution limit and never split
        let mut leaves: Vec<f64> = Vec::new();
        let exhausted = loop {
            let Some(Reverse(entry)) = frontier.pop() else {
                break None;
            };
            if entry.bound >= best.refined.distance - tolerance {
                arena[entry.index].state = NodeState::Pruned;
                break None;
            }
            if iterations >= budget {
                break Some(entry.bound);
            }
            iterations += 1;

            let node = arena[entry.index].clone();
            let solved = self.solve_at(&node.centre, node.inverted)?;
            arena[entry.index].state = NodeState::Solved;
            trace!(
                node = entry.index,
                parent = ?node.parent,
                depth = node.depth,
                bound = node.lower_bound,
                distance = solved.distance,
                "Solved node"
            );
            if solved.distance < best.refined.distance {
                debug!(
                    iteration = iterations,
                    previous = best.refined.distance,
                    distance = solved.distance,
                    "Improved incumbent"
                );
                best = Solution {
                    refined: solved,
                    inverted: node.inverted,
                };
            }

            if node.half_width <= self.config.min_half_width {
                leaves.push(node.lower_bound);
                continue;
            }
            arena[entry.index].state = NodeState::Expanded;
            for (centre, half_width, inverted, lower_bound) in self.bound_regions(self.children(&node)) {
                let index = arena.len();
                let open = lower_bound < best.refined.distance - tolerance;
                arena.push(SearchNode {
                    centre,
                    half_width,
                    inverted,
                    lower_bound,
                    parent: Some(entry.index),
                    depth: node.depth + 1,
                    state: if open { NodeState::Open } else { NodeState::Pruned },
                });
                if open {
                    frontier.push(Reverse(FrontierEntry {
                        bound: lower_bound,
                        index,
                    }));
                }
            }
        };

        // A leaf is resolved only if the final incumbent reaches its bound
        let cutoff = best.refined.distance - tolerance;
        let leaf_floor = leaves
            .iter()
            .copied()
            .filter(|bound| *bound < cutoff)
            .min_by(f64::total_cmp);
        let status = match (exhausted, leaf_floor) {
            (Some(bound), floor) => SearchStatus::BudgetExhausted {
                lower_bound: floor.map_or(bound, |floor| floor.min(bound)),
            },
            (None, Some(floor)) => SearchStatus::ResolutionLimited { lower_bound: floor },
            (None, None) => SearchStatus::Certified,
        };

        match status {
            SearchStatus::BudgetExhausted { lower_bound } => warn!(
                iterations,
                lower_bound,
                distance = best.refined.distance,
                open = frontier.len() + 1,
                "Branch-and-bound budget exhausted before certification"
            ),
            SearchStatus::ResolutionLimited { lower_bound } => warn!(
                iterations,
                lower_bound,
                distance = best.refined.distance,
                min_half_width = self.config.min_half_width,
                "Branch-and-bound stopped at the resolution limit without certification"
            ),
            SearchStatus::Certified => {}
        }

        debug!(
            nodes = arena.len(),
            pruned = arena.iter().filter(|n| n.state == NodeState::Pruned).count(),
            expanded = arena.iter().filter(|n| n.state == NodeState::Expanded).count(),
            leaves = leaves.len(),
            "Branch-and-bound finished"
        );

        Ok(SearchReport {
            best,
            status,
            iterations,
            nodes: arena.len(),
        })
    }
}
