//! Per-chunk execution
//!
//! A worker owns one chunk: it opens a [`RecordScanner`] over the chunk's
//! byte range, hands it to the user's [`RecordProcessor`] together with the
//! chunk's private output paths and returns whatever summary comes back.

use crate::chunk::reducer::Summable;
use crate::chunk::scanner::{RecordLayout, RecordScanner};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info_span};

/// Task descriptor for one byte range of the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub stop: u64,
    /// One partial output file per output channel
    pub output_paths: Vec<PathBuf>,
}

/// What a worker hands back to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult<S> {
    pub index: usize,
    pub summary: S,
    pub partial_paths: Vec<PathBuf>,
}

/// User code applied to the records of one chunk
///
/// `outputs` holds one path per output channel. Whatever is written there is
/// concatenated with the other chunks' files in chunk order, so the format
/// must tolerate plain byte concatenation.
pub trait RecordProcessor: Send + Sync {
    type Summary: Summable + Send + 'static;
    type Error: StdError + Send + Sync + 'static;

    fn process(
        &self,
        records: RecordScanner,
        outputs: &[PathBuf],
    ) -> Result<Self::Summary, Self::Error>;
}

impl<F, S, E> RecordProcessor for F
where
    F: Fn(RecordScanner, &[PathBuf]) -> Result<S, E> + Send + Sync,
    S: Summable + Send + 'static,
    E: StdError + Send + Sync + 'static,
{
    type Summary = S;
    type Error = E;

    fn process(&self, records: RecordScanner, outputs: &[PathBuf]) -> Result<S, E> {
        self(records, outputs)
    }
}

/// Location of chunk `index`'s partial file for output channel `channel`
pub fn partial_output_path(
    temp_root: &Path,
    index: usize,
    channel: usize,
    destination: &Path,
) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    chunk_dir(temp_root, index).join(format!("{channel:02}-{name}"))
}

/// Directory holding chunk `index`'s partial files
pub fn chunk_dir(temp_root: &Path, index: usize) -> PathBuf {
    temp_root.join(format!("chunk-{index:05}"))
}

/// Scan one chunk and run `processor` over its records
pub fn run_chunk<P>(
    chunk: &Chunk,
    input: &Path,
    layout: &RecordLayout,
    processor: &P,
) -> Result<ChunkResult<P::Summary>, EngineError>
where
    P: RecordProcessor + ?Sized,
{
    let span = info_span!("chunk", index = chunk.index, start = chunk.start, stop = chunk.stop);
    let _guard = span.enter();
    let started = Instant::now();

    let records = RecordScanner::open(input, layout, chunk.start, chunk.stop)?;
    debug!(aligned_start = ?records.aligned_start(), "Chunk scanner opened");

    let summary = processor
        .process(records, &chunk.output_paths)
        .map_err(|e| EngineError::Worker {
            chunk_index: chunk.index,
            source: Box::new(e),
        })?;

    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Chunk processed");
    Ok(ChunkResult {
        index: chunk.index,
        summary,
        partial_paths: chunk.output_paths.clone(),
    })
}
