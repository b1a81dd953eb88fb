//! Byte-range planning
//!
//! Offsets are linearly interpolated across the file and are not aligned to
//! records; the scanner does that when each chunk is opened.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, stop)` of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub stop: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }
}

/// Number of chunks actually produced for a file of `file_length` bytes.
///
/// Never more chunks than bytes, never fewer than one.
pub fn effective_chunk_count(file_length: u64, chunk_count: usize) -> usize {
    let requested = chunk_count.max(1) as u64;
    requested.min(file_length).max(1) as usize
}

/// Split `[0, file_length)` into approximately equal ranges.
///
/// `start[i]` is `i * file_length / n` rounded to the nearest byte, each
/// range stops where the next begins and the last stops at `file_length`.
/// An empty file yields the single range `(0, 0)`.
pub fn plan(file_length: u64, chunk_count: usize) -> Vec<ByteRange> {
    let n = effective_chunk_count(file_length, chunk_count) as u128;
    let length = file_length as u128;

    let starts: Vec<u64> = (0..n)
        // round(i * L / n) with halves rounding up, without floating point
        .map(|i| ((2 * i * length + n) / (2 * n)) as u64)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| ByteRange {
            start,
            stop: starts.get(i + 1).copied().unwrap_or(file_length),
        })
        .collect()
}
