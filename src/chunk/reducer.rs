//! Combining chunk results
//!
//! Two things are merged once every worker has returned: the per-channel
//! partial files, concatenated byte for byte in chunk order, and the chunk
//! summaries, folded with [`Summable::sum_with`]. The temporary chunk tree is
//! removed afterwards.

use crate::chunk::worker::ChunkResult;
use crate::config::OutputMode;
use crate::error::EngineError;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::hash::{BuildHasher, Hash};
use std::io::{self, BufReader, BufWriter, Write};
use std::ops::Add;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Values that chunk summaries can be folded into
///
/// Containers combine element-wise; maps combine key-wise, so a
/// `HashMap<K, u64>` works as a counter.
pub trait Summable: Sized {
    fn sum_with(self, other: Self) -> Self;
}

macro_rules! impl_summable_numeric {
    ($($t:ty),* $(,)?) => {
        $(
            impl Summable for $t {
                fn sum_with(self, other: Self) -> Self {
                    self + other
                }
            }
        )*
    };
}

impl_summable_numeric!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl Summable for () {
    fn sum_with(self, _other: Self) -> Self {}
}

macro_rules! impl_summable_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Summable),+> Summable for ($($name,)+) {
            fn sum_with(self, other: Self) -> Self {
                ($(self.$idx.sum_with(other.$idx),)+)
            }
        }
    };
}

impl_summable_tuple!(A 0);
impl_summable_tuple!(A 0, B 1);
impl_summable_tuple!(A 0, B 1, C 2);
impl_summable_tuple!(A 0, B 1, C 2, D 3);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10);
impl_summable_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11);

impl<T: Summable, const N: usize> Summable for [T; N] {
    fn sum_with(self, other: Self) -> Self {
        let mut other = other.into_iter();
        self.map(|a| match other.next() {
            Some(b) => a.sum_with(b),
            None => a,
        })
    }
}

/// Element-wise; the longer vector's tail is kept as is
impl<T: Summable> Summable for Vec<T> {
    fn sum_with(self, other: Self) -> Self {
        let mut merged = Vec::with_capacity(self.len().max(other.len()));
        let mut left = self.into_iter();
        let mut right = other.into_iter();
        loop {
            match (left.next(), right.next()) {
                (Some(a), Some(b)) => merged.push(a.sum_with(b)),
                (Some(v), None) | (None, Some(v)) => merged.push(v),
                (None, None) => break,
            }
        }
        merged
    }
}

impl<K, V, H> Summable for HashMap<K, V, H>
where
    K: Eq + Hash,
    V: Summable,
    H: BuildHasher,
{
    fn sum_with(mut self, other: Self) -> Self {
        for (key, value) in other {
            let merged = match self.remove(&key) {
                Some(existing) => existing.sum_with(value),
                None => value,
            };
            self.insert(key, merged);
        }
        self
    }
}

impl<K: Ord, V: Summable> Summable for BTreeMap<K, V> {
    fn sum_with(mut self, other: Self) -> Self {
        for (key, value) in other {
            let merged = match self.remove(&key) {
                Some(existing) => existing.sum_with(value),
                None => value,
            };
            self.insert(key, merged);
        }
        self
    }
}

/// Adapter for any type that only implements [`Add`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Summed<T>(pub T);

impl<T> Summed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Add<Output = T>> Summable for Summed<T> {
    fn sum_with(self, other: Self) -> Self {
        Summed(self.0 + other.0)
    }
}

/// Fold summaries left to right; `None` when there are none
pub fn merge_summaries<S, I>(summaries: I) -> Option<S>
where
    S: Summable,
    I: IntoIterator<Item = S>,
{
    summaries.into_iter().reduce(Summable::sum_with)
}

/// Final result of a chunked run
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedOutput<S> {
    pub summary: S,
    /// Destination paths, one per output channel
    pub outputs: Vec<PathBuf>,
    pub chunk_count: usize,
}

/// Merge partial files into `destinations`, fold summaries and clean up `temp_root`
pub fn reduce<S: Summable>(
    mut results: Vec<ChunkResult<S>>,
    destinations: &[PathBuf],
    temp_root: &Path,
    mode: OutputMode,
) -> Result<ReducedOutput<S>, EngineError> {
    results.sort_by_key(|r| r.index);
    let chunk_count = results.len();

    for (channel, destination) in destinations.iter().enumerate() {
        let partials: Vec<&Path> = results
            .iter()
            .filter_map(|r| r.partial_paths.get(channel).map(PathBuf::as_path))
            .collect();
        merge_channel(destination, &partials, mode)?;
        debug!(
            channel,
            destination = %destination.display(),
            partials = partials.len(),
            "Merged output channel"
        );
    }

    let partials: Vec<PathBuf> = results
        .iter()
        .flat_map(|r| r.partial_paths.iter().cloned())
        .collect();
    cleanup(&partials, temp_root);

    let summary = merge_summaries(results.into_iter().map(|r| r.summary))
        .ok_or(EngineError::NothingToReduce)?;

    info!(chunk_count, channels = destinations.len(), "Reduced chunk results");
    Ok(ReducedOutput {
        summary,
        outputs: destinations.to_vec(),
        chunk_count,
    })
}

/// Concatenate `partials` in order into `destination`
pub fn merge_channel(
    destination: &Path,
    partials: &[&Path],
    mode: OutputMode,
) -> Result<(), EngineError> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| EngineError::io("failed to create output directory", parent, e))?;
    }

    match mode {
        OutputMode::Truncate => {
            let staging = staging_path(destination);
            let written = File::create(&staging)
                .map_err(|e| EngineError::io("failed to create output file", &staging, e))
                .and_then(|file| concatenate(file, partials, &staging));
            if let Err(e) = written {
                let _ = fs::remove_file(&staging);
                return Err(e);
            }
            fs::rename(&staging, destination)
                .map_err(|e| EngineError::io("failed to move output into place", destination, e))
        }
        OutputMode::Append => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(destination)
                .map_err(|e| EngineError::io("failed to open output file", destination, e))?;
            concatenate(file, partials, destination)
        }
    }
}

fn concatenate(file: File, partials: &[&Path], target: &Path) -> Result<(), EngineError> {
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
    for partial in partials {
        let source = match File::open(partial) {
            Ok(source) => source,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(partial = %partial.display(), "Partial output missing, skipping");
                continue;
            }
            Err(e) => return Err(EngineError::io("failed to open partial output", *partial, e)),
        };
        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source);
        io::copy(&mut reader, &mut writer)
            .map_err(|e| EngineError::io("failed to copy partial output", *partial, e))?;
    }
    writer
        .flush()
        .map_err(|e| EngineError::io("failed to flush output file", target, e))
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Remove partial files, then every directory left empty, then `temp_root` itself
fn cleanup(partials: &[PathBuf], temp_root: &Path) {
    for partial in partials {
        match fs::remove_file(partial) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(partial = %partial.display(), error = %e, "Failed to remove partial output"),
        }
    }

    let mut dirs: Vec<&Path> = partials.iter().filter_map(|p| p.parent()).collect();
    dirs.sort();
    dirs.dedup();
    for dir in dirs {
        remove_if_empty(dir);
    }
    remove_if_empty(temp_root);
}

fn remove_if_empty(dir: &Path) {
    // fails on non-empty directories
    if let Err(e) = fs::remove_dir(dir) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(dir = %dir.display(), error = %e, "Temporary directory left in place");
        }
    }
}
