pub mod log_histogram;
pub mod operation;
pub mod stats;

pub use log_histogram::LogHistogramSampler;
pub use operation::{OpKind, Operation};
pub use stats::ConnectionStats;
