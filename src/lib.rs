//! # chunkwise
//!
//! Parallel map-and-sum over large record-oriented text files such as FASTQ.
//!
//! The input is split into byte ranges, each range is realigned to the next
//! record header, and a user-supplied [`RecordProcessor`] runs over every
//! range on a bounded pool of blocking threads. Per-chunk output files are
//! concatenated in order and per-chunk summaries are added together.
//!
//! ```no_run
//! use chunkwise::{ChunkedMap, EngineConfig, RecordScanner, ScanError};
//! use std::path::PathBuf;
//!
//! # async fn run() -> Result<(), chunkwise::EngineError> {
//! let count = |records: RecordScanner, _outputs: &[PathBuf]| -> Result<(u64, u64), ScanError> {
//!     let mut reads = 0;
//!     let mut bases = 0;
//!     for record in records {
//!         let record = record?;
//!         reads += 1;
//!         bases += record.sequence().map_or(0, |s| s.len() as u64);
//!     }
//!     Ok((reads, bases))
//! };
//!
//! let reduced = ChunkedMap::new(EngineConfig::default())
//!     .map_sum("reads.fastq", &[], count)
//!     .await?;
//! println!("{} reads, {} bases", reduced.summary.0, reduced.summary.1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `pool` - Bounded, order-preserving parallel map with progress reporting
//! - `chunk` - Planning, record scanning, per-chunk workers and reduction
//! - `decompress` - Expanding compressed inputs before chunking
//! - `config` - Serde configuration loaded from TOML
//! - `error` - Error types for every layer
//! - `logging` - Tracing subscriber setup

pub mod chunk;
pub mod config;
pub mod decompress;
pub mod error;
pub mod logging;
pub mod pool;

pub use chunk::{
    detect_header_prefix, map_sum, merge_summaries, plan, reduce, run_chunk, ByteRange, Chunk,
    ChunkResult, ChunkedMap, Record, RecordLayout, RecordProcessor, RecordScanner, ReducedOutput,
    Summable, Summed,
};
pub use config::{EngineConfig, OutputMode, PoolConfig, PoolMode, RecordConfig};
pub use decompress::{prepare_input, Compression};
pub use error::{error_trace, EngineError, MapError, ScanError};
pub use pool::{
    low_memory_pmap, pmap, ChannelProgress, NoProgress, ParallelMap, ProgressSink,
    ProgressSnapshot, TerminalProgress,
};
