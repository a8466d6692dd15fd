pub mod aligner;
pub mod cache;
pub mod traits;
pub mod types;

pub use aligner::*;
pub use cache::*;
pub use traits::*;
pub use types::*;
