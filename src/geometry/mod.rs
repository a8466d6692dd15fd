pub mod kernel;
pub mod rotation;

pub use kernel::*;
pub use rotation::*;
