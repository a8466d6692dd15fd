use crate::algorithms::branch_bound::{
    BranchAndBound, SearchOutcome, SearchSpace, Solution,
};
use crate::algorithms::hungarian::assign_by_type;
use crate::algorithms::refine::{Refined, Refiner};
use crate::algorithms::{PeriodicFourier, SphericalHarmonics};
use crate::analysis::rmsd_from_distance;
use crate::config::{AlignmentConfig, Config, SearchConfig};
use crate::geometry::{self, PeriodicBox};
use crate::logging::AlignmentSpan;
use crate::pipeline::{
    AlignmentResult, Candidate, CoefficientCache, HarmonicCoefficients, HarmonicTransform,
    HungarianResult, PermutationGroups, PointSet,
};
use crate::{AlignError, Result};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which overlap basis an aligner uses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AlignMode {
    /// Translations in a periodic box, plane-wave basis
    Periodic(PeriodicBox),
    /// Rotations about the centroid, spherical harmonic basis
    Spherical,
}

impl AlignMode {
    pub fn name(&self) -> &'static str {
        match self {
            AlignMode::Periodic(_) => "periodic",
            AlignMode::Spherical => "spherical",
        }
    }

    pub fn cell(&self) -> Option<&PeriodicBox> {
        match self {
            AlignMode::Periodic(cell) => Some(cell),
            AlignMode::Spherical => None,
        }
    }
}

/// Coordinates prepared for one pairwise alignment
struct Problem {
    groups1: PermutationGroups,
    groups2: PermutationGroups,
    /// First configuration, centred in spherical mode
    moving: Vec<Vector3<f64>>,
    /// `-moving`, present when improper alignments are searched
    inverted: Option<Vec<Vector3<f64>>>,
    fixed: Vec<Vector3<f64>>,
    centroid1: Vector3<f64>,
    centroid2: Vector3<f64>,
}

/// Immutable, thread-safe entry point for all alignment operations
pub struct Aligner {
    mode: AlignMode,
    transform: Box<dyn HarmonicTransform>,
    alignment: AlignmentConfig,
    search: SearchConfig,
}

impl Aligner {
    pub fn new(mode: AlignMode, config: &Config) -> Result<Self> {
        let transform: Box<dyn HarmonicTransform> = match mode {
            AlignMode::Periodic(cell) => Box::new(PeriodicFourier::new(cell, &config.periodic)?),
            AlignMode::Spherical => Box::new(SphericalHarmonics::new(&config.spherical)?),
        };
        debug!(
            mode = mode.name(),
            transform = transform.name(),
            "Created aligner"
        );
        Ok(Self {
            mode,
            transform,
            alignment: config.alignment.clone(),
            search: config.search.clone(),
        })
    }

    pub fn periodic(cell: PeriodicBox, config: &Config) -> Result<Self> {
        Self::new(AlignMode::Periodic(cell), config)
    }

    pub fn spherical(config: &Config) -> Result<Self> {
        Self::new(AlignMode::Spherical, config)
    }

    /// Periodic when box lengths are given, spherical otherwise.
    pub fn from_config(box_lengths: Option<[f64; 3]>, config: &Config) -> Result<Self> {
        match box_lengths {
            Some(lengths) => Self::periodic(PeriodicBox::new(lengths)?, config),
            None => Self::spherical(config),
        }
    }

    pub fn mode(&self) -> &AlignMode {
        &self.mode
    }

    pub fn transform(&self) -> &dyn HarmonicTransform {
        self.transform.as_ref()
    }

    /// Standalone coefficient precomputation for repeated alignments.
    pub fn coefficients(&self, points: &PointSet) -> Result<HarmonicCoefficients> {
        self.transform.compute_coefficients(points)
    }

    /// Best permutation with the identity transform.
    pub fn hungarian(&self, first: &PointSet, second: &PointSet) -> Result<HungarianResult> {
        let span = AlignmentSpan::current("hungarian", self.mode.name(), first.len());
        let _enter = span.enter();
        let (groups1, groups2) = check_shapes(first, second)?;
        let (permutation, distance) = assign_by_type(
            first.positions(),
            second.positions(),
            &groups1,
            &groups2,
            self.mode.cell(),
        );
        span.record_result(distance, rmsd_from_distance(distance, first.len()), false);
        Ok(HungarianResult {
            distance,
            permutation,
        })
    }

    pub fn align(&self, first: &PointSet, second: &PointSet) -> Result<AlignmentResult> {
        self.align_with_coefficients(first, second, None)
    }

    /// Full pipeline. `precomputed` skips the transform step; the pair must
    /// come from this aligner's transform and match the two point sets.
    pub fn align_with_coefficients(
        &self,
        first: &PointSet,
        second: &PointSet,
        precomputed: Option<(&HarmonicCoefficients, &HarmonicCoefficients)>,
    ) -> Result<AlignmentResult> {
        let span = AlignmentSpan::current("align", self.mode.name(), first.len());
        let _enter = span.enter();
        let problem = self.prepare(first, second)?;
        let solution = match precomputed {
            Some((k1, k2)) => {
                span.record_coefficients(true, k1.len() + k2.len());
                self.best_candidate(&problem, k1, k2, &span)?
            }
            None => {
                let (k1, k2) = self.compute_pair(first, second)?;
                span.record_coefficients(false, k1.len() + k2.len());
                self.best_candidate(&problem, &k1, &k2, &span)?
            }
        };
        let result = self.finish(first, second, &problem, &solution);
        span.record_result(result.distance, result.rmsd(), result.inverted);
        Ok(result)
    }

    /// [`Aligner::align`] with coefficients looked up in, or added to, `cache`.
    pub fn align_cached(
        &self,
        cache: &mut CoefficientCache,
        first: &PointSet,
        second: &PointSet,
    ) -> Result<AlignmentResult> {
        let k1 = cache.get_or_compute(self.transform(), first)?;
        let k2 = cache.get_or_compute(self.transform(), second)?;
        self.align_with_coefficients(first, second, Some((k1.as_ref(), k2.as_ref())))
    }

    /// Branch-and-bound from the best overlap candidate, at most `niter`
    /// nodes solved.
    pub fn branch_and_bound(
        &self,
        first: &PointSet,
        second: &PointSet,
        niter: usize,
    ) -> Result<SearchOutcome> {
        let span = AlignmentSpan::current("branch_and_bound", self.mode.name(), first.len());
        let _enter = span.enter();
        let problem = self.prepare(first, second)?;
        let (k1, k2) = self.compute_pair(first, second)?;
        span.record_coefficients(false, k1.len() + k2.len());
        let incumbent = self.best_candidate(&problem, &k1, &k2, &span)?;

        let space = match self.mode {
            AlignMode::Periodic(cell) => SearchSpace::Translation(cell),
            AlignMode::Spherical => SearchSpace::Rotation,
        };
        let search = BranchAndBound::new(
            space,
            self.refiner(&problem, &problem.moving),
            problem.inverted.as_ref().map(|inv| self.refiner(&problem, inv)),
            self.search.clone(),
        );
        let report = search.search(incumbent, niter)?;
        span.record_search(report.iterations, report.nodes, report.status.is_certified());

        let result = self.finish(first, second, &problem, &report.best);
        span.record_result(result.distance, result.rmsd(), result.inverted);
        Ok(SearchOutcome {
            result,
            status: report.status,
            iterations: report.iterations,
            nodes: report.nodes,
        })
    }

    fn compute_pair(
        &self,
        first: &PointSet,
        second: &PointSet,
    ) -> Result<(HarmonicCoefficients, HarmonicCoefficients)> {
        let (k1, k2) = rayon::join(
            || self.transform.compute_coefficients(first),
            || self.transform.compute_coefficients(second),
        );
        Ok((k1?, k2?))
    }

    fn prepare(&self, first: &PointSet, second: &PointSet) -> Result<Problem> {
        let (groups1, groups2) = check_shapes(first, second)?;
        let (centroid1, centroid2) = match self.mode {
            AlignMode::Spherical => (first.centroid(), second.centroid()),
            AlignMode::Periodic(_) => (Vector3::zeros(), Vector3::zeros()),
        };
        let moving: Vec<Vector3<f64>> = first.positions().iter().map(|p| p - centroid1).collect();
        let fixed = second.positions().iter().map(|p| p - centroid2).collect();
        let inverted = self
            .alignment
            .invert
            .then(|| moving.iter().map(|p| -p).collect());
        Ok(Problem {
            groups1,
            groups2,
            moving,
            inverted,
            fixed,
            centroid1,
            centroid2,
        })
    }

    fn refiner<'a>(&'a self, problem: &'a Problem, moving: &'a [Vector3<f64>]) -> Refiner<'a> {
        Refiner {
            moving,
            fixed: &problem.fixed,
            groups1: &problem.groups1,
            groups2: &problem.groups2,
            cell: self.mode.cell(),
            max_iterations: self.alignment.refine_iterations,
            tolerance: self.alignment.refine_tolerance,
        }
    }

    /// Rank overlap candidates and keep the best after local refinement.
    fn best_candidate(
        &self,
        problem: &Problem,
        k1: &HarmonicCoefficients,
        k2: &HarmonicCoefficients,
        span: &AlignmentSpan,
    ) -> Result<Solution> {
        check_coefficients(k1, &problem.groups1)?;
        check_coefficients(k2, &problem.groups2)?;

        let limit = self.alignment.max_candidates;
        let mut candidates: Vec<(Candidate, bool)> = self
            .transform
            .evaluate(k1, k2, limit)?
            .into_iter()
            .map(|c| (c, false))
            .collect();
        if problem.inverted.is_some() {
            let improper = self.transform.evaluate(&k1.inverted(), k2, limit)?;
            candidates.extend(improper.into_iter().map(|c| (c, true)));
        }
        span.record_candidates(candidates.len(), candidates.first().map(|(c, _)| c.score));

        let proper = self.refiner(problem, &problem.moving);
        let improper = problem.inverted.as_ref().map(|inv| self.refiner(problem, inv));

        if candidates.is_empty() {
            let refined = proper.evaluate(&Matrix3::identity(), &Vector3::zeros());
            return Ok(Solution {
                refined,
                inverted: false,
            });
        }

        let refined: Vec<Refined> = candidates
            .par_iter()
            .map(|(candidate, inverted)| {
                let refiner = select(&proper, &improper, *inverted);
                match self.mode {
                    AlignMode::Spherical => refiner.refine_rotation(&candidate.transform.rotation),
                    AlignMode::Periodic(_) => Ok(refiner.refine_translation(
                        &candidate.transform.rotation,
                        &candidate.transform.translation,
                    )),
                }
            })
            .collect::<Result<_>>()?;

        let mut best: Option<Solution> = None;
        for (index, (r, (_, inverted))) in refined.into_iter().zip(&candidates).enumerate() {
            span.record_refinement(index, r.distance, r.steps);
            if best
                .as_ref()
                .map_or(true, |b| r.distance < b.refined.distance)
            {
                best = Some(Solution {
                    refined: r,
                    inverted: *inverted,
                });
            }
        }
        best.ok_or_else(|| AlignError::Numerical("no candidate survived refinement".to_string()))
    }

    /// Express a solution in the original frames of both configurations.
    fn finish(
        &self,
        first: &PointSet,
        second: &PointSet,
        problem: &Problem,
        solution: &Solution,
    ) -> AlignmentResult {
        let refined = &solution.refined;
        let rotation = if solution.inverted {
            -refined.rotation
        } else {
            refined.rotation
        };
        let translation = match self.mode {
            AlignMode::Spherical => problem.centroid2 - rotation * problem.centroid1,
            AlignMode::Periodic(_) => refined.translation,
        };
        let aligned1 = geometry::transform_points(first.positions(), &rotation, &translation);
        let aligned2: Vec<Vector3<f64>> = refined
            .permutation
            .iter()
            .map(|&j| second.positions()[j])
            .collect();
        let distance = geometry::sum_squared_distances(&aligned1, &aligned2, self.mode.cell());

        AlignmentResult {
            distance,
            rotation,
            translation,
            permutation: refined.permutation.clone(),
            aligned1,
            aligned2,
            inverted: solution.inverted,
        }
    }
}

fn select<'r, 'a>(
    proper: &'r Refiner<'a>,
    improper: &'r Option<Refiner<'a>>,
    inverted: bool,
) -> &'r Refiner<'a> {
    match (improper, inverted) {
        (Some(r), true) => r,
        _ => proper,
    }
}

fn check_shapes(first: &PointSet, second: &PointSet) -> Result<(PermutationGroups, PermutationGroups)> {
    if first.len() != second.len() {
        return Err(AlignError::ShapeMismatch(format!(
            "configurations have {} and {} points",
            first.len(),
            second.len()
        )));
    }
    let groups1 = first.groups();
    let groups2 = second.groups();
    groups1.check_compatible(&groups2)?;
    Ok((groups1, groups2))
}

fn check_coefficients(coefficients: &HarmonicCoefficients, groups: &PermutationGroups) -> Result<()> {
    if coefficients.labels() != groups.labels() || coefficients.counts() != groups.counts().as_slice() {
        return Err(AlignError::DimensionError(format!(
            "{} coefficients describe classes {:?} x {:?}, configuration has {:?} x {:?}",
            coefficients.mode(),
            coefficients.labels(),
            coefficients.counts(),
            groups.labels(),
            groups.counts()
        )));
    }
    Ok(())
}
