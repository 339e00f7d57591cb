pub mod aggregation;
pub mod file_worker;
pub mod prompt;
pub mod sanitize;

pub use aggregation::{AggregationScope, AggregationWorker};
pub use file_worker::FileAnalysisWorker;
