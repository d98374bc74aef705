//! Resource governor: limits, admission control and telemetry.

pub mod limits;
pub mod telemetry;

pub use limits::{ConcurrencyGate, OperationGuard, ResourceLimits};
pub use telemetry::{HealthStatus, HistogramSnapshot, LatencyHistogram, RecallStats, Telemetry};
