//! Permutation-invariant alignment of atomic clusters.
//!
//! Two configurations of labelled points are compared up to rigid motion and
//! relabelling of indistinguishable points. A Fourier-domain overlap search
//! (plane waves for periodic boxes, spherical harmonics for free clusters)
//! ranks candidate transforms cheaply, an exact Hungarian assignment fixes
//! the permutation at each candidate, and a branch-and-bound search can
//! certify the global optimum.

pub mod algorithms;
pub mod analysis;
pub mod config;
pub mod data;
pub mod geometry;
pub mod logging;
pub mod pipeline;

pub use algorithms::{
    BranchAndBound, PeriodicFourier, SearchOutcome, SearchStatus, SphericalHarmonics,
};
pub use config::Config;
pub use pipeline::*;

/// Errors raised by the alignment engine
#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("dimension error: {0}")]
    DimensionError(String),

    #[error("numerical failure: {0}")]
    Numerical(String),
}

pub type Result<T> = std::result::Result<T, AlignError>;
