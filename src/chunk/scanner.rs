//! Record boundary recovery and iteration
//!
//! A chunk's raw start offset usually lands in the middle of a record. The
//! scanner reads forward a bounded number of lines to find the next header,
//! rewinds to the start of that header line and then yields whole records
//! until its position reaches the chunk's stop offset. A record whose header
//! starts before `stop` is always emitted in full, so consecutive chunks
//! neither lose nor duplicate records.

use crate::config::RecordConfig;
use crate::error::ScanError;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

const BUFFER_SIZE: usize = 64 * 1024;

/// How records are recognized and how far to search for one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    /// Bytes every header line starts with
    pub header_prefix: Vec<u8>,
    /// Lines per record, header included
    pub lines_per_record: usize,
    /// Lines read while searching for the first header
    pub scan_bound: usize,
}

impl RecordLayout {
    /// Four-line FASTQ records
    pub fn fastq(header_prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            header_prefix: header_prefix.into(),
            lines_per_record: 4,
            scan_bound: 5,
        }
    }

    pub fn new(header_prefix: impl Into<Vec<u8>>, lines_per_record: usize) -> Self {
        Self {
            header_prefix: header_prefix.into(),
            lines_per_record,
            scan_bound: lines_per_record + 1,
        }
    }

    /// Build a layout from configuration and an already known prefix
    pub fn from_config(config: &RecordConfig, header_prefix: Vec<u8>) -> Self {
        Self {
            header_prefix,
            lines_per_record: config.lines_per_record,
            scan_bound: config.scan_bound,
        }
    }

    fn is_header(&self, line: &[u8]) -> bool {
        line.starts_with(&self.header_prefix)
    }
}

/// One record: a header line followed by its payload lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    offset: u64,
    lines: Vec<Vec<u8>>,
}

impl Record {
    pub fn new(offset: u64, lines: Vec<Vec<u8>>) -> Self {
        Self { offset, lines }
    }

    /// Byte offset of the header line in the input file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Header line without its terminator
    pub fn header(&self) -> &[u8] {
        self.line(0).unwrap_or_default()
    }

    /// Line `index` without its terminator
    pub fn line(&self, index: usize) -> Option<&[u8]> {
        self.lines.get(index).map(|line| trim_newline(line))
    }

    /// All lines without terminators
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.lines.iter().map(|line| trim_newline(line))
    }

    /// Lines exactly as read, terminators included
    pub fn raw_lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    /// Size of the record in the input file
    pub fn len_bytes(&self) -> u64 {
        self.lines.iter().map(|line| line.len() as u64).sum()
    }

    /// Write the record back byte for byte
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for line in &self.lines {
            writer.write_all(line)?;
        }
        Ok(())
    }

    /// FASTQ sequence line
    pub fn sequence(&self) -> Option<&[u8]> {
        self.line(1)
    }

    /// FASTQ quality line
    pub fn quality(&self) -> Option<&[u8]> {
        self.line(3)
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Lazy iterator over the records of one byte range
#[derive(Debug)]
pub struct RecordScanner {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    position: u64,
    stop: u64,
    aligned_start: Option<u64>,
    lines_per_record: usize,
}

impl RecordScanner {
    /// Open `path` and align to the first record header at or after `start`.
    ///
    /// The scanner is empty when `start >= stop` or when end-of-file is
    /// reached before any header. Running out of the scan bound without a
    /// header is an error.
    pub fn open(
        path: &Path,
        layout: &RecordLayout,
        start: u64,
        stop: u64,
    ) -> Result<Self, ScanError> {
        let io_err = |source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let file_length = file.metadata().map_err(io_err)?.len();

        if start >= stop || start >= file_length {
            return Ok(Self::empty(path, start, stop, layout));
        }

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let at_line_start = if start == 0 {
            true
        } else {
            reader.seek(SeekFrom::Start(start - 1)).map_err(io_err)?;
            let mut previous = [0u8; 1];
            reader.read_exact(&mut previous).map_err(io_err)?;
            previous[0] == b'\n'
        };

        let mut position = start;
        let mut scanned: Vec<String> = Vec::new();
        let mut line = Vec::new();
        let mut aligned = None;

        for _ in 0..layout.scan_bound {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).map_err(io_err)?;
            if read == 0 {
                // A record's tail never holds a full record's worth of lines.
                let headerless = scanned
                    .iter()
                    .skip(usize::from(!at_line_start))
                    .filter(|l| !l.trim().is_empty())
                    .count();
                if headerless >= layout.lines_per_record {
                    warn!(
                        path = %path.display(),
                        start,
                        stop,
                        lines = headerless,
                        "Ignoring lines without a record header at end of file"
                    );
                } else {
                    trace!(start, stop, "No record header before end of file");
                }
                return Ok(Self::empty(path, start, stop, layout));
            }
            if layout.is_header(&line) {
                aligned = Some(position);
                break;
            }
            scanned.push(String::from_utf8_lossy(trim_newline(&line)).into_owned());
            position += read as u64;
        }

        let Some(aligned) = aligned else {
            return Err(ScanError::BoundaryNotFound {
                offset: start,
                stop,
                file_length,
                lines_scanned: scanned.len(),
                prefix: String::from_utf8_lossy(&layout.header_prefix).into_owned(),
                scanned,
            });
        };

        reader.seek(SeekFrom::Start(aligned)).map_err(io_err)?;
        trace!(start, aligned, stop, "Aligned chunk to record header");

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            position: aligned,
            stop,
            aligned_start: Some(aligned),
            lines_per_record: layout.lines_per_record,
        })
    }

    fn empty(path: &Path, start: u64, stop: u64, layout: &RecordLayout) -> Self {
        Self {
            path: path.to_path_buf(),
            reader: None,
            position: start,
            stop,
            aligned_start: None,
            lines_per_record: layout.lines_per_record,
        }
    }

    /// Offset of the first record, or `None` if the range holds no record start
    pub fn aligned_start(&self) -> Option<u64> {
        self.aligned_start
    }

    /// Current byte position in the input file
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

impl Iterator for RecordScanner {
    type Item = Result<Record, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.stop {
            self.close();
            return None;
        }
        let reader = self.reader.as_mut()?;

        let offset = self.position;
        let mut lines = Vec::with_capacity(self.lines_per_record);
        for _ in 0..self.lines_per_record {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(read) => {
                    self.position += read as u64;
                    lines.push(line);
                }
                Err(source) => {
                    self.close();
                    return Some(Err(ScanError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }

        if lines.is_empty() {
            self.close();
            return None;
        }
        if lines.len() < self.lines_per_record {
            self.close();
            return Some(Err(ScanError::TruncatedRecord {
                offset,
                expected: self.lines_per_record,
                found: lines.len(),
            }));
        }

        Some(Ok(Record::new(offset, lines)))
    }
}

impl FusedIterator for RecordScanner {}

/// Derive the header prefix from the first line of `path`.
///
/// The prefix is everything before the first `delimiter`, or the whole line
/// when the delimiter does not occur. An empty file yields an empty prefix.
pub fn detect_header_prefix(path: &Path, delimiter: u8) -> Result<Vec<u8>, ScanError> {
    let file = File::open(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut first_line = Vec::new();
    BufReader::new(file)
        .take(BUFFER_SIZE as u64)
        .read_until(b'\n', &mut first_line)
        .map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if first_line.is_empty() {
        return Ok(Vec::new());
    }

    let line = trim_newline(&first_line);
    let prefix = match line.iter().position(|&b| b == delimiter) {
        Some(end) => &line[..end],
        None => line,
    };

    if prefix.is_empty() {
        return Err(ScanError::HeaderPrefixUndetected {
            path: path.to_path_buf(),
        });
    }
    Ok(prefix.to_vec())
}
