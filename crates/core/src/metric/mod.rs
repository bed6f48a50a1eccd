//! Per-node metric storage.

pub mod dense;
pub mod sparse;

pub use dense::DenseMetric;
pub use sparse::{SparseDouble, SparseEntry, SparseInt};
