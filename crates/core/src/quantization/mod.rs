pub mod binary;
pub mod kmeans;
pub mod pq;
pub mod scalar;

pub use pq::{AdcMode, PqCodebook, PqDistanceTable};
pub use scalar::{ScalarQuantConfig, ScalarQuantizer};
