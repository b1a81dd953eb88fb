//! Structured error types for chunked parallel processing
//!
//! Scanner failures, pool failures and engine failures are kept in separate
//! enums so each layer can be used on its own. Worker errors keep the
//! original error value so callers can recover it.

use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error produced by user code running inside a worker
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised while locating and iterating records
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(
        "no record header starting with {prefix:?} within {lines_scanned} lines of offset {offset} \
         (stop {stop}, file length {file_length}); scanned lines: {}",
        .scanned.join(" | ")
    )]
    BoundaryNotFound {
        offset: u64,
        stop: u64,
        file_length: u64,
        lines_scanned: usize,
        prefix: String,
        scanned: Vec<String>,
    },

    #[error("record at offset {offset} is truncated: expected {expected} lines, found {found}")]
    TruncatedRecord {
        offset: u64,
        expected: usize,
        found: usize,
    },

    #[error("could not derive a record header prefix from the first line of {path}")]
    HeaderPrefixUndetected { path: PathBuf },

    #[error("I/O error while scanning {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by [`crate::ParallelMap`]
///
/// `Task` carries the error value returned by the mapped function unchanged.
#[derive(Debug, Error)]
pub enum MapError<E>
where
    E: StdError + Send + Sync + 'static,
{
    #[error("task {index} failed: {source}")]
    Task {
        index: usize,
        #[source]
        source: E,
    },

    #[error("task {index} panicked: {message}")]
    Panicked { index: usize, message: String },

    #[error("task {index} was cancelled before completing")]
    Cancelled { index: usize },
}

impl<E> MapError<E>
where
    E: StdError + Send + Sync + 'static,
{
    /// Index of the input whose task failed
    pub fn index(&self) -> usize {
        match self {
            Self::Task { index, .. } | Self::Panicked { index, .. } | Self::Cancelled { index } => {
                *index
            }
        }
    }

    /// The original task error, if the failure came from the mapped function
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Task { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Main error type for chunked file processing
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("worker for chunk {chunk_index} failed: {source}")]
    Worker {
        chunk_index: usize,
        #[source]
        source: BoxError,
    },

    #[error("worker for chunk {chunk_index} panicked: {message}")]
    WorkerPanicked { chunk_index: usize, message: String },

    #[error("{context}: {path}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decompress {path} with {tool}: {reason}")]
    Decompression {
        path: PathBuf,
        tool: String,
        reason: String,
    },

    #[error("invalid configuration: {field} = {value} ({reason})")]
    InvalidConfiguration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("failed to parse configuration {}", .path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<inline>".to_string()))]
    Config {
        path: Option<PathBuf>,
        #[source]
        source: toml::de::Error,
    },

    #[error("no chunk results to reduce")]
    NothingToReduce,

    #[error("background task failed: {0}")]
    Join(String),
}

impl EngineError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Borrow the original worker error as `E`, if this is a worker failure of that type
    pub fn worker_source<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Worker { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Chunk the failure originated from, when known
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::Worker { chunk_index, .. } | Self::WorkerPanicked { chunk_index, .. } => {
                Some(*chunk_index)
            }
            _ => None,
        }
    }
}

impl From<MapError<EngineError>> for EngineError {
    fn from(err: MapError<EngineError>) -> Self {
        match err {
            MapError::Task { source, .. } => source,
            MapError::Panicked { index, message } => Self::WorkerPanicked {
                chunk_index: index,
                message,
            },
            MapError::Cancelled { index } => {
                Self::Join(format!("task for chunk {index} was cancelled"))
            }
        }
    }
}

/// Render an error and every source below it, one cause per line
pub fn error_trace(err: &(dyn StdError + 'static)) -> String {
    let mut trace = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        trace.push_str("\n  caused by: ");
        trace.push_str(&cause.to_string());
        current = cause.source();
    }
    trace
}
