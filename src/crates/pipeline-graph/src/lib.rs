pub mod finalize;
pub mod sink;

pub use finalize::{finalize_run, finalize_run_with_page_size, FinalizationOutcome};
pub use sink::{GraphSink, NullGraphSink};

#[cfg(feature = "neo4j")]
pub use sink::neo4j::Neo4jGraphSink;
