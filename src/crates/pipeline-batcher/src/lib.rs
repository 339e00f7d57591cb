pub mod pack;
pub mod run;
pub mod tokenizer;
pub mod walker;

pub use pack::BatchPacker;
pub use run::{run_batcher, BatcherOutcome};
pub use tokenizer::count_tokens;
pub use walker::stream_paths;
