use crate::algorithms::{PeriodicCoefficients, SphericalCoefficients};
use crate::pipeline::{Candidate, PointSet};
use crate::Result;

/// A basis expansion of point densities together with the overlap search it
/// enables
pub trait HarmonicTransform: Send + Sync {
    /// Returns the name of the transform
    fn name(&self) -> &str;

    /// Truncated expansion of one configuration; pure in the coordinates,
    /// labels and the transform parameters.
    fn compute_coefficients(&self, points: &PointSet) -> Result<HarmonicCoefficients>;

    /// Score the whole candidate grid from two expansions and return its local
    /// maxima, best first. Never looks at coordinates.
    fn evaluate(
        &self,
        first: &HarmonicCoefficients,
        second: &HarmonicCoefficients,
        max_candidates: usize,
    ) -> Result<Vec<Candidate>>;

    /// Stable description of the parameters, part of cache keys
    fn fingerprint(&self) -> String;
}

/// Coefficients produced by one of the two transforms
#[derive(Debug, Clone, PartialEq)]
pub enum HarmonicCoefficients {
    Periodic(PeriodicCoefficients),
    Spherical(SphericalCoefficients),
}

impl HarmonicCoefficients {
    pub fn mode(&self) -> &'static str {
        match self {
            HarmonicCoefficients::Periodic(_) => "periodic",
            HarmonicCoefficients::Spherical(_) => "spherical",
        }
    }

    /// Coefficients of the point-inverted configuration.
    pub fn inverted(&self) -> Self {
        match self {
            HarmonicCoefficients::Periodic(c) => HarmonicCoefficients::Periodic(c.inverted()),
            HarmonicCoefficients::Spherical(c) => HarmonicCoefficients::Spherical(c.inverted()),
        }
    }

    /// Points per type class, ordered by ascending label
    pub fn counts(&self) -> &[usize] {
        match self {
            HarmonicCoefficients::Periodic(c) => &c.counts,
            HarmonicCoefficients::Spherical(c) => &c.counts,
        }
    }

    pub fn labels(&self) -> &[u32] {
        match self {
            HarmonicCoefficients::Periodic(c) => &c.labels,
            HarmonicCoefficients::Spherical(c) => &c.labels,
        }
    }

    /// Number of complex values held
    pub fn len(&self) -> usize {
        match self {
            HarmonicCoefficients::Periodic(c) => c.data.len(),
            HarmonicCoefficients::Spherical(c) => c.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
