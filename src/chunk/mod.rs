//! Chunked processing of record-oriented files
//!
//! - [`planner`] splits the file into byte ranges
//! - [`scanner`] aligns a range to record boundaries and iterates records
//! - [`worker`] runs user code over one range
//! - [`reducer`] concatenates partial outputs and folds summaries
//! - [`engine`] drives the whole pipeline

pub mod engine;
pub mod planner;
pub mod reducer;
pub mod scanner;
pub mod worker;

pub use engine::{build_chunks, map_sum, temp_root_for, ChunkedMap};
pub use planner::{effective_chunk_count, plan, ByteRange};
pub use reducer::{merge_summaries, reduce, ReducedOutput, Summable, Summed};
pub use scanner::{detect_header_prefix, Record, RecordLayout, RecordScanner};
pub use worker::{partial_output_path, run_chunk, Chunk, ChunkResult, RecordProcessor};
