//! Input preparation
//!
//! Byte-range chunking needs random access, so compressed inputs are
//! expanded next to the original before planning. Gzip is decoded
//! in-process; bzip2 and xz go through the system tools.

use crate::error::EngineError;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tracing::{debug, info};

/// Compression recognized from a file suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz" | "gzip") => Self::Gzip,
            Some("bz2") => Self::Bzip2,
            Some("xz" | "lzma") => Self::Xz,
            _ => Self::None,
        }
    }

    /// External program used for this format, if any
    pub fn tool(&self) -> Option<&'static str> {
        match self {
            Self::Bzip2 => Some("bunzip2"),
            Self::Xz => Some("unxz"),
            Self::Gzip | Self::None => None,
        }
    }
}

/// Return a path that can be scanned by byte offset.
///
/// Compressed inputs are expanded beside the source with the suffix removed,
/// and the source is kept. With `decompress` off the path is returned as is.
pub async fn prepare_input(path: &Path, decompress: bool) -> Result<PathBuf, EngineError> {
    let compression = Compression::from_path(path);
    if !decompress || compression == Compression::None {
        return Ok(path.to_path_buf());
    }

    let target = path.with_extension("");
    info!(
        input = %path.display(),
        output = %target.display(),
        ?compression,
        "Decompressing input before chunking"
    );

    match compression {
        Compression::Gzip => {
            let source = path.to_path_buf();
            let destination = target.clone();
            tokio::task::spawn_blocking(move || gunzip(&source, &destination))
                .await
                .map_err(|e| EngineError::Join(e.to_string()))??;
        }
        Compression::Bzip2 | Compression::Xz => {
            let tool = compression.tool().unwrap_or_default();
            run_tool(tool, path).await?;
        }
        Compression::None => {}
    }

    debug!(output = %target.display(), "Input decompressed");
    Ok(target)
}

fn gunzip(source: &Path, destination: &Path) -> Result<(), EngineError> {
    let failure = |reason: io::Error| EngineError::Decompression {
        path: source.to_path_buf(),
        tool: "gzip".to_string(),
        reason: reason.to_string(),
    };

    let input = File::open(source).map_err(failure)?;
    let output = File::create(destination).map_err(failure)?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(output);
    io::copy(&mut decoder, &mut writer).map_err(failure)?;
    writer.flush().map_err(failure)?;
    Ok(())
}

async fn run_tool(tool: &str, path: &Path) -> Result<(), EngineError> {
    let failure = |reason: String| EngineError::Decompression {
        path: path.to_path_buf(),
        tool: tool.to_string(),
        reason,
    };

    let output = tokio::process::Command::new(tool)
        .args(["-k", "-f"])
        .arg(path)
        .output()
        .await
        .map_err(|e| failure(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failure(format!(
            "{}: {}",
            describe_status(output.status),
            stderr.trim()
        )));
    }
    Ok(())
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with status {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {signal}");
        }
    }
    "terminated abnormally".to_string()
}
