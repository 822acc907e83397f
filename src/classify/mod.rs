pub mod classify_reads;
pub mod classify_sequence;
pub mod consensus;

pub use classify_reads::classify_reads_parallel;
pub use classify_sequence::{Search, SearchOptions, TraceEvent};
pub use consensus::compile_consensus;
