//! Line-delimited JSON output.

use crate::io::compression::{FinishWrite, auto_detect_writer};
use crate::io::jsonl::write_record;
use crate::sink::RecordSink;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

enum Destination {
    Stdout,
    File(PathBuf),
    Writer(String),
}

/// Writes each record as one compact JSON line.
///
/// No batching: every record goes straight to the underlying (buffered) writer.
/// A file whose extension names a compression codec (`.gz`, `.zst`, ...) is
/// written compressed.
pub struct StreamSink {
    out: Box<dyn FinishWrite>,
    dest: Destination,
    written: u64,
}

impl StreamSink {
    /// Write to standard output.
    pub fn stdout() -> Self {
        Self {
            out: Box::new(BufWriter::new(std::io::stdout().lock())),
            dest: Destination::Stdout,
            written: 0,
        }
    }

    /// Create (or truncate) `path` and write to it. Parent directories are
    /// created as needed.
    ///
    /// # Errors
    /// Returns an error if the directories or the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let out = auto_detect_writer(f, path)
            .with_context(|| format!("setup compression for {}", path.display()))?;
        Ok(Self {
            out,
            dest: Destination::File(path.to_path_buf()),
            written: 0,
        })
    }

    /// Write to an arbitrary writer, buffered.
    pub fn from_writer<W: Write + 'static>(writer: W, label: impl Into<String>) -> Self {
        Self {
            out: Box::new(BufWriter::new(writer)),
            dest: Destination::Writer(label.into()),
            written: 0,
        }
    }

    /// Append one record.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn write(&mut self, record: &Value) -> Result<()> {
        write_record(&mut self.out, record)
            .with_context(|| format!("write record to {}", self.describe()))?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish the output and release the destination. A compressed file gets
    /// its trailer here; stdout is only flushed.
    ///
    /// # Errors
    /// Returns an error if finishing or the final flush fails.
    pub fn close(self) -> Result<u64> {
        let destination = self.describe();
        let StreamSink { out, written, .. } = self;
        out.finish_stream()
            .with_context(|| format!("finish {destination}"))?;
        debug!(destination = %destination, written, "stream sink closed");
        Ok(written)
    }

    fn describe(&self) -> String {
        match &self.dest {
            Destination::Stdout => "stdout".to_string(),
            Destination::File(p) => p.display().to_string(),
            Destination::Writer(label) => label.clone(),
        }
    }
}

impl RecordSink for StreamSink {
    fn write(&mut self, record: &Value) -> Result<()> {
        StreamSink::write(self, record)
    }

    fn close(self: Box<Self>) -> Result<()> {
        StreamSink::close(*self).map(|_| ())
    }

    fn describe(&self) -> String {
        StreamSink::describe(self)
    }
}
