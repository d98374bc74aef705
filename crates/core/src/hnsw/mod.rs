//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! The graph stores topology only; node ids are store slots and distances are
//! computed against the shared vector store. Optional binary quantization keeps
//! packed sign codes for Hamming traversal followed by an exact rerank, and
//! optional ACORN traversal widens the beam under selective filters.

/// Graph structure and configuration.
pub mod graph;
/// Insertion, relinking and heuristic pruning.
pub mod insert;
/// Layer search and multi-layer k-NN.
pub mod search;
/// Generation-stamped visited set.
pub mod visited;

pub use graph::{HnswConfig, HnswGraph};
