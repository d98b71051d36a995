//! Downsampling gzip archive for recorded sessions.
//!
//! A dataset lives at `<dataset_dir>/<category>/<date>/<label>.txt`; the
//! archive is written beside it as `<label>.gz`. The first `skip_rows` lines
//! (the device preamble) are copied verbatim. After that a line at index
//! `i` is kept when `i % downsample == skip_rows`, or always when
//! `downsample == 1`. Lines are copied byte for byte.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::core::errors::{LhmError, Result};

/// Source and destination of one dataset entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetPaths {
    pub source: PathBuf,
    pub archive: PathBuf,
}

/// Resolve `<dataset_dir>/<category>/<date>/<label>.{txt,gz}`.
pub fn dataset_paths(dataset_dir: &Path, category: &str, date: &str, label: &str) -> DatasetPaths {
    let base = dataset_dir.join(category).join(date);
    DatasetPaths {
        source: base.join(format!("{label}.txt")),
        archive: base.join(format!("{label}.gz")),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub lines_in: u64,
    pub lines_out: u64,
}

/// Whether line `index` survives downsampling.
///
/// A `skip_rows` of `downsample` or more keeps no line past the preamble
/// when `downsample > 1`.
pub const fn keep_line(index: usize, downsample: usize, skip_rows: usize) -> bool {
    if index < skip_rows || downsample == 1 {
        return true;
    }
    downsample > 1 && index % downsample == skip_rows
}

/// Write the downsampled gzip archive of `source` to `dest`.
pub fn compress(source: &Path, dest: &Path, downsample: usize, skip_rows: usize) -> Result<ArchiveReport> {
    if downsample == 0 {
        return Err(LhmError::InvalidConfig {
            details: "archive downsample must be >= 1".to_string(),
        });
    }

    let input = File::open(source).map_err(|e| LhmError::io(source, e))?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| LhmError::io(parent, e))?;
    }
    let output = File::create(dest).map_err(|e| LhmError::io(dest, e))?;

    let mut reader = BufReader::new(input);
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    let mut report = ArchiveReport::default();
    let mut line = Vec::with_capacity(256);
    let mut index = 0usize;

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| LhmError::io(source, e))?;
        if n == 0 {
            break;
        }
        report.lines_in += 1;
        if keep_line(index, downsample, skip_rows) {
            encoder.write_all(&line).map_err(|e| LhmError::io(dest, e))?;
            report.lines_out += 1;
        }
        index += 1;
    }

    let mut inner = encoder.finish().map_err(|e| LhmError::io(dest, e))?;
    inner.flush().map_err(|e| LhmError::io(dest, e))?;
    Ok(report)
}

/// Read an archive back as text lines, terminators stripped.
pub fn decompress_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| LhmError::io(path, e))?;
    let mut text = String::new();
    GzDecoder::new(BufReader::new(file))
        .read_to_string(&mut text)
        .map_err(|e| LhmError::io(path, e))?;
    Ok(text.lines().map(str::to_string).collect())
}
