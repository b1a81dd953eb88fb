//! Chunked map-and-sum over a record-oriented file
//!
//! The coordinator prepares the input, splits it into byte ranges, creates
//! the temporary chunk tree, runs one worker per range through
//! [`ParallelMap`] and finally hands every [`ChunkResult`] to the reducer.

use crate::chunk::planner::{plan, ByteRange};
use crate::chunk::reducer::{reduce, ReducedOutput};
use crate::chunk::scanner::{detect_header_prefix, RecordLayout};
use crate::chunk::worker::{
    chunk_dir, partial_output_path, run_chunk, Chunk, ChunkResult, RecordProcessor,
};
use crate::config::EngineConfig;
use crate::decompress::prepare_input;
use crate::error::{error_trace, EngineError};
use crate::pool::{NoProgress, ParallelMap, ProgressSink, TerminalProgress};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

/// Splits an input file into chunks and maps a [`RecordProcessor`] over them
#[derive(Clone)]
pub struct ChunkedMap {
    config: EngineConfig,
    progress: Arc<dyn ProgressSink>,
    span: Span,
}

impl std::fmt::Debug for ChunkedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedMap")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ChunkedMap {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ChunkedMap {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoProgress),
            span: tracing::info_span!("chunked_map"),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `processor` over every chunk of `input` and merge the results.
    ///
    /// Each chunk writes one partial file per entry in `outputs`; those are
    /// concatenated into `outputs` in chunk order. If any chunk fails, the
    /// error of the lowest failing chunk is returned and the partial files
    /// of the other chunks are left in the temporary tree.
    pub async fn map_sum<P>(
        &self,
        input: impl AsRef<Path>,
        outputs: &[PathBuf],
        processor: P,
    ) -> Result<ReducedOutput<P::Summary>, EngineError>
    where
        P: RecordProcessor + 'static,
    {
        self.config.validate()?;

        let input = prepare_input(input.as_ref(), self.config.decompress_input).await?;
        let file_length = tokio::fs::metadata(&input)
            .await
            .map_err(|e| EngineError::io("failed to stat input", &input, e))?
            .len();

        let layout = self.record_layout(&input, file_length).await?;
        let ranges = plan(file_length, self.config.chunks);
        let temp_root = temp_root_for(
            &input,
            self.config.temp_dir.as_deref(),
            &self.config.temp_dir_prefix,
        );
        let chunks = build_chunks(&ranges, &temp_root, outputs);

        info!(
            parent: &self.span,
            input = %input.display(),
            file_length,
            chunks = chunks.len(),
            channels = outputs.len(),
            temp_root = %temp_root.display(),
            "Starting chunked map"
        );

        prepare_directories(&temp_root, &chunks, outputs).await?;

        let results = self.run_chunks(&input, layout, chunks, processor).await?;

        let destinations = outputs.to_vec();
        let mode = self.config.output_mode;
        let reduced = tokio::task::spawn_blocking(move || {
            reduce(results, &destinations, &temp_root, mode)
        })
        .await
        .map_err(|e| EngineError::Join(e.to_string()))??;

        info!(
            parent: &self.span,
            chunk_count = reduced.chunk_count,
            "Chunked map finished"
        );
        Ok(reduced)
    }

    async fn record_layout(
        &self,
        input: &Path,
        file_length: u64,
    ) -> Result<RecordLayout, EngineError> {
        let record = &self.config.record;
        let prefix = match &record.header_prefix {
            Some(prefix) => prefix.as_bytes().to_vec(),
            None if file_length == 0 => Vec::new(),
            None => {
                let path = input.to_path_buf();
                let delimiter = record.header_delimiter as u8;
                let prefix =
                    tokio::task::spawn_blocking(move || detect_header_prefix(&path, delimiter))
                        .await
                        .map_err(|e| EngineError::Join(e.to_string()))??;
                debug!(
                    parent: &self.span,
                    prefix = %String::from_utf8_lossy(&prefix),
                    "Detected record header prefix"
                );
                prefix
            }
        };
        Ok(RecordLayout::from_config(record, prefix))
    }

    async fn run_chunks<P>(
        &self,
        input: &Path,
        layout: RecordLayout,
        chunks: Vec<Chunk>,
        processor: P,
    ) -> Result<Vec<ChunkResult<P::Summary>>, EngineError>
    where
        P: RecordProcessor + 'static,
    {
        let pool = ParallelMap::new(self.config.pool.clone())
            .with_progress(self.progress.clone())
            .with_span(self.span.clone());

        let processor = Arc::new(processor);
        let input = input.to_path_buf();
        let task = move |chunk: Chunk| run_chunk(&chunk, &input, &layout, processor.as_ref());

        pool.map(task, chunks).await.map_err(|e| {
            let err = EngineError::from(e);
            warn!(
                parent: &self.span,
                chunk = ?err.chunk_index(),
                trace = %error_trace(&err),
                "Chunked map failed; partial outputs of other chunks are left in place"
            );
            err
        })
    }
}

/// Temporary tree for `input`: `<base>/<prefix><sample>`
///
/// `base` is `temp_dir` or the input's directory, and `sample` is the input
/// file name up to its first `.`.
pub fn temp_root_for(input: &Path, temp_dir: Option<&Path>, prefix: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sample = name.split('.').next().unwrap_or_default();
    let base = temp_dir
        .or_else(|| input.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(format!("{prefix}{sample}"))
}

/// Create every directory a run writes into and clear partial files left by an earlier run
///
/// Partials of a failed run stay in the temporary tree; a processor that
/// does not create its output for an empty chunk would otherwise get them
/// merged into the new result.
pub async fn prepare_directories(
    temp_root: &Path,
    chunks: &[Chunk],
    outputs: &[PathBuf],
) -> Result<(), EngineError> {
    for parent in outputs
        .iter()
        .filter_map(|dest| dest.parent())
        .filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io("failed to create output directory", parent, e))?;
    }

    if outputs.is_empty() {
        return Ok(());
    }

    for chunk in chunks {
        let dir = chunk_dir(temp_root, chunk.index);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::io("failed to create chunk directory", &dir, e))?;

        for partial in &chunk.output_paths {
            match tokio::fs::remove_file(partial).await {
                Ok(()) => debug!(partial = %partial.display(), "Removed stale partial output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(EngineError::io(
                        "failed to remove stale partial output",
                        partial,
                        e,
                    ))
                }
            }
        }
    }
    Ok(())
}

/// Turn planned ranges into task descriptors with their partial output paths
pub fn build_chunks(ranges: &[ByteRange], temp_root: &Path, outputs: &[PathBuf]) -> Vec<Chunk> {
    ranges
        .iter()
        .enumerate()
        .map(|(index, range)| Chunk {
            index,
            start: range.start,
            stop: range.stop,
            output_paths: outputs
                .iter()
                .enumerate()
                .map(|(channel, dest)| partial_output_path(temp_root, index, channel, dest))
                .collect(),
        })
        .collect()
}

/// Chunked map with default configuration and a terminal progress bar
pub async fn map_sum<P>(
    input: impl AsRef<Path>,
    outputs: &[PathBuf],
    processor: P,
) -> Result<ReducedOutput<P::Summary>, EngineError>
where
    P: RecordProcessor + 'static,
{
    ChunkedMap::new(EngineConfig::default())
        .with_progress(Arc::new(TerminalProgress::new("Chunks")))
        .map_sum(input, outputs, processor)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_root_uses_sample_name() {
        assert_eq!(
            temp_root_for(Path::new("/data/SRR01.fastq"), None, "tmp"),
            PathBuf::from("/data/tmpSRR01")
        );
        assert_eq!(
            temp_root_for(Path::new("/data/x.fq"), Some(Path::new("/scratch")), "work-"),
            PathBuf::from("/scratch/work-x")
        );
        assert_eq!(
            temp_root_for(Path::new("reads.fastq"), None, "tmp"),
            PathBuf::from("./tmpreads")
        );
    }

    #[tokio::test]
    async fn test_prepare_directories_clears_stale_partials() {
        let dir = tempfile::TempDir::new().unwrap();
        let temp_root = dir.path().join("tmpreads");
        let outputs = vec![dir.path().join("results").join("out.fq")];
        let chunks = build_chunks(&plan(10, 2), &temp_root, &outputs);

        let stale = &chunks[1].output_paths[0];
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(stale, "@old\n").unwrap();

        prepare_directories(&temp_root, &chunks, &outputs).await.unwrap();

        assert!(!stale.exists());
        assert!(chunk_dir(&temp_root, 0).is_dir());
        assert!(chunk_dir(&temp_root, 1).is_dir());
        assert!(dir.path().join("results").is_dir());
    }

    #[test]
    fn test_build_chunks_assigns_partials_per_channel() {
        let ranges = plan(100, 2);
        let outputs = vec![PathBuf::from("/out/r1.fq"), PathBuf::from("/out/r2.fq")];
        let chunks = build_chunks(&ranges, Path::new("/t"), &outputs);

        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[1].start, chunks[1].stop), (50, 100));
        assert_eq!(
            chunks[1].output_paths,
            vec![
                PathBuf::from("/t/chunk-00001/00-r1.fq"),
                PathBuf::from("/t/chunk-00001/01-r2.fq"),
            ]
        );
    }
}
