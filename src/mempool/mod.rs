// Transaction admission pool
pub mod pool;

pub use pool::{AdmissionPool, TieBreak};
