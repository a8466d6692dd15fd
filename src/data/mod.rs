pub mod generator;
pub mod transformer;

pub use generator::*;
pub use transformer::*;
