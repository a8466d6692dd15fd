pub mod branch_bound;
pub mod fourier;
pub mod harmonics;
pub mod hungarian;
pub mod periodic;
pub mod refine;
pub mod spherical;

pub use branch_bound::{BranchAndBound, NodeState, SearchNode, SearchOutcome, SearchStatus};
pub use hungarian::{Assignment, CostMatrix};
pub use periodic::*;
pub use spherical::*;
