// Shared primitives and the crate-wide error type
pub mod primitives;
pub mod error;

pub use primitives::*;
pub use error::*;
