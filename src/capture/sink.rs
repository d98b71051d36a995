//! Append-only CSV log of accepted samples.
//!
//! The file is opened on the first write, not at construction, so a session
//! that never produces a valid record leaves no empty file behind. Every row
//! is flushed before `write` returns. The header is written only when the file
//! is new or empty, so appending to an earlier session keeps one header.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::capture::record::{RecordLayout, Sample};
use crate::core::errors::{LhmError, Result};

/// Lazily opened CSV writer owned by the ingest task.
pub struct SampleSink {
    path: PathBuf,
    layout: RecordLayout,
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

impl SampleSink {
    pub fn new(path: impl Into<PathBuf>, layout: RecordLayout) -> Self {
        Self {
            path: path.into(),
            layout,
            writer: None,
            rows_written: 0,
        }
    }

    /// Append one row and flush it.
    pub fn write(&mut self, sample: &Sample) -> Result<()> {
        let mut writer = match self.writer.take() {
            Some(w) => w,
            None => open_with_header(&self.path, &self.layout)?,
        };
        let row = format_row(sample);
        // A failed handle is dropped here; the next write reopens the file.
        writer
            .write_all(row.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|source| LhmError::io(&self.path, source))?;
        self.writer = Some(writer);
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and release the file handle. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush().map_err(|source| LhmError::io(&self.path, source))?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl Drop for SampleSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            eprintln!("[LHM-SINK] close on drop failed: {e}");
        }
    }
}

fn open_with_header(path: &Path, layout: &RecordLayout) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| LhmError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LhmError::io(path, source))?;
    let existing = file.metadata().map(|m| m.len()).unwrap_or(0);

    let mut writer = BufWriter::new(file);
    if existing == 0 {
        let header = layout.column_names().collect::<Vec<_>>().join(",");
        writeln!(writer, "{header}")
            .and_then(|()| writer.flush())
            .map_err(|source| LhmError::io(path, source))?;
    }
    Ok(writer)
}

fn format_row(sample: &Sample) -> String {
    let mut row = sample.timestamp.to_string();
    for value in &sample.values {
        row.push(',');
        row.push_str(&value.to_string());
    }
    row.push('\n');
    row
}

/// Default capture file name: `<prefix>-YYYY-MM-DD-HH-MM-SS.csv`.
pub fn session_file_name(prefix: &str, started: DateTime<Local>) -> String {
    format!("{prefix}-{}.csv", started.format("%Y-%m-%d-%H-%M-%S"))
}

/// Re-read a persisted log, header excluded.
pub fn read_log(path: &Path) -> Result<Vec<Sample>> {
    let file = File::open(path).map_err(|source| LhmError::io(path, source))?;
    let mut samples = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| LhmError::io(path, source))?;
        if index == 0 || line.trim().is_empty() {
            continue;
        }
        samples.push(parse_row(&line).ok_or_else(|| LhmError::Serialization {
            context: "csv",
            details: format!("{}:{}: unreadable row {line:?}", path.display(), index + 1),
        })?);
    }
    Ok(samples)
}

fn parse_row(line: &str) -> Option<Sample> {
    let mut fields = line.split(',');
    let timestamp = fields.next()?.trim().parse::<u64>().ok()?;
    let values = fields
        .map(|f| f.trim().parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;
    Some(Sample { timestamp, values })
}
