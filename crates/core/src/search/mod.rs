//! Search primitives: brute-force exact search and metadata filter expressions.

/// Exact k-NN and range scans over the store.
pub mod exact;
/// Filter expression tree and evaluation.
pub mod filter;
/// Filter expression parser.
pub mod parser;

pub use exact::{exact_knn, exact_knn_among, exact_range};
pub use filter::{CompareOp, Filter, Literal};
