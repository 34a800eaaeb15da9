//! JSON Lines (JSONL) reading and writing.
//!
//! This module provides:
//! - **Lazy record source**: [`JsonlSource`] re-opens its file on every call to
//!   [`JsonlSource::records`], so a run can always start again from line one.
//! - **Line iterator**: [`JsonlRecords`] decodes one `serde_json::Value` per line
//!   from any `BufRead` and keeps count of the lines it consumed.
//! - **Line writer**: [`write_record`] emits a record as one compact JSON line.
//!
//! # Notes
//! - Every line must hold one JSON value. A line that does not, including an
//!   empty or whitespace-only one, is a hard error; there is no per-line
//!   recovery.
//! - Inputs are decompressed transparently when their extension or magic bytes
//!   name a known codec (see [`crate::io::compression`]).

use crate::io::compression::auto_detect_reader;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read, Write};
use std::path::{Path, PathBuf};

/// Characters of an offending line quoted in decode errors.
const ERROR_PREVIEW_CHARS: usize = 120;

/// Records iterator over a (possibly decompressed) file.
pub type FileRecords = JsonlRecords<BufReader<Box<dyn Read>>>;

/// A restartable source of JSONL records backed by a file.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    /// Remember `path` as the record source. Nothing is opened yet.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file from the beginning and return a lazy record iterator.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its compression codec
    /// cannot be set up.
    pub fn records(&self) -> Result<FileRecords> {
        let f = File::open(&self.path).with_context(|| format!("open {}", self.path.display()))?;
        let rdr = auto_detect_reader(f, &self.path)
            .with_context(|| format!("setup decompression for {}", self.path.display()))?;
        Ok(JsonlRecords::new(
            BufReader::new(rdr),
            self.path.display().to_string(),
        ))
    }
}

/// Lazy iterator of decoded JSONL records.
///
/// Yields `Err` for the first line that fails to read or decode; callers are
/// expected to stop there.
pub struct JsonlRecords<R> {
    lines: Lines<R>,
    label: String,
    lines_read: u64,
}

impl<R: BufRead> JsonlRecords<R> {
    /// Wrap a buffered reader. `label` names the source in error messages.
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            label: label.into(),
            lines_read: 0,
        }
    }

    /// Number of lines consumed so far, including a line that failed to decode.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl<R: BufRead> Iterator for JsonlRecords<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        self.lines_read += 1;
        let line_no = self.lines_read;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                return Some(
                    Err(e).with_context(|| format!("read line {} in {}", line_no, self.label)),
                );
            }
        };
        Some(serde_json::from_str(&line).with_context(|| {
            let preview: String = line.chars().take(ERROR_PREVIEW_CHARS).collect();
            format!("parse JSONL line {} in {}: {:?}", line_no, self.label, preview)
        }))
    }
}

/// Write `record` as a single compact JSON line followed by `\n`.
///
/// Non-ASCII text is written as UTF-8, not escaped.
///
/// # Errors
/// Returns an error if serialization or the underlying write fails.
pub fn write_record<W: Write + ?Sized>(w: &mut W, record: &Value) -> Result<()> {
    serde_json::to_writer(&mut *w, record).context("serialize record")?;
    w.write_all(b"\n").context("write record terminator")?;
    Ok(())
}
