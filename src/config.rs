//! Configuration for the parallel pool and the chunked engine
//!
//! Every struct has serde defaults so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! chunks = 200
//! temp_dir = "/scratch"
//! output_mode = "append"
//!
//! [pool]
//! concurrency = 8
//! mode = "low_memory"
//! progress_interval = "500ms"
//!
//! [record]
//! header_prefix = "@SRR001666"
//! lines_per_record = 4
//! ```

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the pool schedules work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// Submit every input up front and let all tasks run to completion
    #[default]
    Eager,
    /// Stream inputs through a bounded, ordered pipeline
    LowMemory,
}

/// How merged channel files are written to their destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Replace the destination (written as `.part`, then renamed)
    #[default]
    Truncate,
    /// Append to whatever the destination already holds
    Append,
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of tasks executing at once
    pub concurrency: usize,
    /// Scheduling strategy
    pub mode: PoolMode,
    /// Niceness the coordinator lowers itself to before dispatch
    pub niceness: Option<i32>,
    /// Minimum time between progress updates
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: available_cpus(),
            mode: PoolMode::Eager,
            niceness: Some(DEFAULT_NICENESS),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Streaming configuration for long, memory-hungry tasks: half the CPUs
    pub fn low_memory() -> Self {
        Self {
            concurrency: available_cpus().div_ceil(2).max(1),
            mode: PoolMode::LowMemory,
            ..Self::default()
        }
    }

    /// Builder-style concurrency override
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder-style niceness override; `None` leaves priority untouched
    pub fn with_niceness(mut self, niceness: Option<i32>) -> Self {
        self.niceness = niceness;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.concurrency == 0 {
            return Err(invalid("pool.concurrency", 0, "must be at least 1"));
        }
        if let Some(niceness) = self.niceness {
            if !(-20..=19).contains(&niceness) {
                return Err(invalid("pool.niceness", niceness, "must be within -20..=19"));
            }
        }
        Ok(())
    }
}

/// Shape of the records in the input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Prefix every header line starts with; detected from the first line when unset
    pub header_prefix: Option<String>,
    /// Byte that ends the detected prefix on the first line
    pub header_delimiter: char,
    /// Lines per record, header included
    pub lines_per_record: usize,
    /// Lines read while looking for the first header after a raw offset
    pub scan_bound: usize,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            header_prefix: None,
            header_delimiter: ':',
            lines_per_record: 4,
            scan_bound: 5,
        }
    }
}

impl RecordConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.lines_per_record == 0 {
            return Err(invalid("record.lines_per_record", 0, "must be at least 1"));
        }
        if self.scan_bound <= self.lines_per_record {
            return Err(invalid(
                "record.scan_bound",
                self.scan_bound,
                "must exceed lines_per_record so any offset can reach the next header",
            ));
        }
        if !self.header_delimiter.is_ascii() {
            return Err(invalid(
                "record.header_delimiter",
                self.header_delimiter,
                "must be a single ASCII character",
            ));
        }
        if matches!(&self.header_prefix, Some(prefix) if prefix.is_empty()) {
            return Err(invalid("record.header_prefix", "\"\"", "must not be empty"));
        }
        Ok(())
    }
}

/// Configuration for [`crate::ChunkedMap`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub record: RecordConfig,
    /// Number of byte ranges to split the input into
    pub chunks: usize,
    /// Directory that holds the temporary chunk tree; defaults to the input's directory
    pub temp_dir: Option<PathBuf>,
    /// Prefix of the temporary directory name (followed by the sample name)
    pub temp_dir_prefix: String,
    /// Decompress `.gz`/`.bz2`/`.xz` inputs before scanning
    pub decompress_input: bool,
    pub output_mode: OutputMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default()
                .with_concurrency(available_cpus().saturating_sub(1).max(1)),
            record: RecordConfig::default(),
            chunks: DEFAULT_CHUNKS,
            temp_dir: None,
            temp_dir_prefix: "tmp".to_string(),
            decompress_input: true,
            output_mode: OutputMode::Truncate,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(text).map_err(|source| EngineError::Config { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::io("failed to read configuration", path, e))?;
        let config: Self = toml::from_str(&text).map_err(|source| EngineError::Config {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.pool.validate()?;
        self.record.validate()?;
        if self.chunks == 0 {
            return Err(invalid("chunks", 0, "must be at least 1"));
        }
        if self.temp_dir_prefix.contains(std::path::is_separator) {
            return Err(invalid(
                "temp_dir_prefix",
                &self.temp_dir_prefix,
                "must not contain path separators",
            ));
        }
        Ok(())
    }
}

const DEFAULT_NICENESS: i32 = 10;
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_CHUNKS: usize = 1000;

/// Number of CPUs available to this process
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

fn invalid(field: &str, value: impl std::fmt::Display, reason: &str) -> EngineError {
    EngineError::InvalidConfiguration {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
