//! Record processors used across the integration tests

use chunkwise::{RecordProcessor, RecordScanner, ScanError};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing record {header}")]
    Rejected { header: String },
}

fn create(path: &Path) -> Result<BufWriter<File>, ProcessorError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ProcessorError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn finish(mut writer: BufWriter<File>, path: &Path) -> Result<(), ProcessorError> {
    writer.flush().map_err(|source| ProcessorError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Copies every record to the first output; sums (reads, bases)
pub struct CopyRecords;

impl RecordProcessor for CopyRecords {
    type Summary = (u64, u64);
    type Error = ProcessorError;

    fn process(
        &self,
        records: RecordScanner,
        outputs: &[PathBuf],
    ) -> Result<(u64, u64), ProcessorError> {
        let mut writer = create(&outputs[0])?;
        let (mut reads, mut bases) = (0, 0);
        for record in records {
            let record = record?;
            reads += 1;
            bases += record.sequence().map_or(0, |s| s.len() as u64);
            record
                .write_to(&mut writer)
                .map_err(|source| ProcessorError::Write {
                    path: outputs[0].clone(),
                    source,
                })?;
        }
        finish(writer, &outputs[0])?;
        Ok((reads, bases))
    }
}

/// Copies records like [`CopyRecords`] but fails on one header
pub struct RejectHeader(pub String);

impl RecordProcessor for RejectHeader {
    type Summary = (u64, u64);
    type Error = ProcessorError;

    fn process(
        &self,
        records: RecordScanner,
        outputs: &[PathBuf],
    ) -> Result<(u64, u64), ProcessorError> {
        let mut writer = create(&outputs[0])?;
        let mut reads = 0;
        for record in records {
            let record = record?;
            let header = String::from_utf8_lossy(record.header()).into_owned();
            if header == self.0 {
                return Err(ProcessorError::Rejected { header });
            }
            reads += 1;
            record
                .write_to(&mut writer)
                .map_err(|source| ProcessorError::Write {
                    path: outputs[0].clone(),
                    source,
                })?;
        }
        finish(writer, &outputs[0])?;
        Ok((reads, 0))
    }
}

/// Copies records, creating the output only once a record arrives
pub struct CopyWhenNonEmpty;

impl RecordProcessor for CopyWhenNonEmpty {
    type Summary = u64;
    type Error = ProcessorError;

    fn process(&self, records: RecordScanner, outputs: &[PathBuf]) -> Result<u64, ProcessorError> {
        let mut writer = None;
        let mut reads = 0;
        for record in records {
            let record = record?;
            if writer.is_none() {
                writer = Some(create(&outputs[0])?);
            }
            if let Some(out) = writer.as_mut() {
                record
                    .write_to(out)
                    .map_err(|source| ProcessorError::Write {
                        path: outputs[0].clone(),
                        source,
                    })?;
            }
            reads += 1;
        }
        if let Some(out) = writer {
            finish(out, &outputs[0])?;
        }
        Ok(reads)
    }
}

/// Sends records with an even read number to output 0 and odd ones to output 1
pub struct SplitByParity;

impl RecordProcessor for SplitByParity {
    type Summary = [u64; 2];
    type Error = ProcessorError;

    fn process(&self, records: RecordScanner, outputs: &[PathBuf]) -> Result<[u64; 2], ProcessorError> {
        let mut even = create(&outputs[0])?;
        let mut odd = create(&outputs[1])?;
        let mut counts = [0u64; 2];
        for record in records {
            let record = record?;
            let number: u64 = String::from_utf8_lossy(record.header())
                .split(':')
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            let channel = (number % 2) as usize;
            counts[channel] += 1;
            let (writer, path) = if channel == 0 {
                (&mut even, &outputs[0])
            } else {
                (&mut odd, &outputs[1])
            };
            record
                .write_to(writer)
                .map_err(|source| ProcessorError::Write {
                    path: path.clone(),
                    source,
                })?;
        }
        finish(even, &outputs[0])?;
        finish(odd, &outputs[1])?;
        Ok(counts)
    }
}

/// Counts bases and headers without writing anything
pub struct CountBases;

impl RecordProcessor for CountBases {
    type Summary = (BTreeMap<u8, u64>, BTreeMap<String, u64>);
    type Error = ScanError;

    fn process(
        &self,
        records: RecordScanner,
        _outputs: &[PathBuf],
    ) -> Result<Self::Summary, ScanError> {
        let mut bases = BTreeMap::new();
        let mut headers = BTreeMap::new();
        for record in records {
            let record = record?;
            for &base in record.sequence().unwrap_or_default() {
                *bases.entry(base).or_insert(0) += 1;
            }
            *headers
                .entry(String::from_utf8_lossy(record.header()).into_owned())
                .or_insert(0) += 1;
        }
        Ok((bases, headers))
    }
}

/// Sequential reference: count bases and headers over the whole text
pub fn count_sequentially(contents: &str) -> (BTreeMap<u8, u64>, BTreeMap<String, u64>) {
    let mut bases = BTreeMap::new();
    let mut headers = BTreeMap::new();
    for record in contents.lines().collect::<Vec<_>>().chunks(4) {
        *headers.entry(record[0].to_string()).or_insert(0) += 1;
        for &base in record[1].as_bytes() {
            *bases.entry(base).or_insert(0) += 1;
        }
    }
    (bases, headers)
}
