//! FASTQ input files in a temporary directory

use anyhow::Result;
use chunkwise::{EngineConfig, PoolConfig, PoolMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const BASES: &[u8] = b"ACGT";

/// One FASTQ record as text
pub fn fastq_record(name: &str, sequence: &str) -> String {
    format!("@{name}\n{sequence}\n+\n{}\n", "I".repeat(sequence.len()))
}

/// `count` reads with random sequences of 20..120 bases
pub fn synthetic_reads(count: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let length = rng.random_range(20..120);
            let sequence: String = (0..length)
                .map(|_| BASES[rng.random_range(0..BASES.len())] as char)
                .collect();
            fastq_record(&format!("read:{i}:lane1"), &sequence)
        })
        .collect()
}

/// Temporary directory holding one input file
pub struct FastqFixture {
    /// Temporary directory (automatically cleaned up on drop)
    pub temp_dir: TempDir,
    pub input: PathBuf,
    pub contents: String,
}

impl FastqFixture {
    pub fn new(contents: impl Into<String>) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let input = temp_dir.path().join("reads.fastq");
        let contents = contents.into();
        std::fs::write(&input, &contents)?;
        Ok(Self {
            temp_dir,
            input,
            contents,
        })
    }

    pub fn with_reads(count: usize, seed: u64) -> Result<Self> {
        Self::new(synthetic_reads(count, seed))
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Destination path inside the fixture directory
    pub fn output(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("out").join(name)
    }

    /// Default temporary tree for the input
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.path().join("tmpreads")
    }
}

/// Engine configuration suited to tests: no niceness, no throttling
pub fn engine_config(chunks: usize, concurrency: usize) -> EngineConfig {
    EngineConfig {
        chunks,
        pool: PoolConfig {
            concurrency,
            mode: PoolMode::Eager,
            niceness: None,
            progress_interval: Duration::ZERO,
        },
        ..EngineConfig::default()
    }
}
