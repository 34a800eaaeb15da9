//! Pipeline driver: source → tag filter → projection → sink → compression.
//!
//! Processing is strictly sequential. Each decoded record is checked against the
//! [`TagFilter`]; matching records are projected onto the schema and written to
//! the sink. With a limit of `n`, reading stops right after the `n`-th write, so
//! no further lines are consumed. Records rejected by the filter never count
//! toward the limit.
//!
//! The sink is always closed, also when reading or writing failed, so a store
//! keeps every batch that was complete before the failure. The first error is
//! the one reported.

use crate::config::{OutputMode, PipelineConfig, TagFilter};
use crate::io::compression::{CompressionReport, codec_by_name, codec_names, compress_store};
use crate::io::jsonl::{JsonlRecords, JsonlSource};
use crate::project::project;
use crate::schema::{SchemaModel, load_schema};
use crate::sink::{RecordSink, StoreSink, StreamSink};
use anyhow::{Result, anyhow};
use serde::Serialize;
use std::io::BufRead;
use tracing::{debug, info};

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Input lines consumed, including skipped and filtered ones.
    pub lines_read: u64,
    /// Records handed to the sink.
    pub records_written: u64,
    /// Present when the store was compressed after the run.
    pub compression: Option<CompressionReport>,
}

/// Executes one [`PipelineConfig`].
pub struct Runner {
    config: PipelineConfig,
}

impl Runner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline to completion.
    ///
    /// # Errors
    /// Returns an error for an unknown compression codec (before any work is
    /// done), an unreadable input, a malformed input line, a sink failure, or a
    /// failed compression pass. A bad schema is not an error: the run continues
    /// in pass-through mode.
    pub fn run(&self) -> Result<RunSummary> {
        let cfg = &self.config;

        let codec = match &cfg.output {
            OutputMode::Store {
                compress: Some(name),
                ..
            } => Some(codec_by_name(name).ok_or_else(|| {
                anyhow!(
                    "unknown compression codec {name:?} (available: {})",
                    codec_names().join(", ")
                )
            })?),
            _ => None,
        };

        let schema = load_schema(&cfg.schema);
        let source = JsonlSource::open(&cfg.input);
        let mut records = source.records()?;

        let sink: Box<dyn RecordSink> = match &cfg.output {
            OutputMode::Stream { output: None } => Box::new(StreamSink::stdout()),
            OutputMode::Stream { output: Some(path) } => Box::new(StreamSink::create(path)?),
            OutputMode::Store { db, batch_size, .. } => {
                Box::new(StoreSink::with_batch_size(db, *batch_size)?)
            }
        };
        info!(input = %source.path().display(), output = %sink.describe(), "starting run");

        let mut summary = drive(&mut records, &cfg.filter, schema.as_ref(), sink, cfg.limit)?;

        if let (Some(codec), OutputMode::Store { db, .. }) = (codec, &cfg.output) {
            summary.compression = Some(compress_store(db, codec.as_ref())?);
        }

        info!(
            lines_read = summary.lines_read,
            records_written = summary.records_written,
            "run complete"
        );
        Ok(summary)
    }
}

/// Pump `records` through the filter and projector into `sink`, then close it.
///
/// `limit = Some(0)` writes nothing and reads nothing.
///
/// # Errors
/// Returns the first decode or sink error; the sink is closed either way and a
/// close error is reported only when nothing failed before it.
pub fn drive<R: BufRead>(
    records: &mut JsonlRecords<R>,
    filter: &TagFilter,
    schema: Option<&SchemaModel>,
    mut sink: Box<dyn RecordSink>,
    limit: Option<u64>,
) -> Result<RunSummary> {
    let mut written = 0u64;
    let pumped = pump(records, filter, schema, sink.as_mut(), limit, &mut written);
    let closed = sink.close();
    pumped?;
    closed?;
    Ok(RunSummary {
        lines_read: records.lines_read(),
        records_written: written,
        compression: None,
    })
}

fn pump<R: BufRead>(
    records: &mut JsonlRecords<R>,
    filter: &TagFilter,
    schema: Option<&SchemaModel>,
    sink: &mut dyn RecordSink,
    limit: Option<u64>,
    written: &mut u64,
) -> Result<()> {
    if limit == Some(0) {
        return Ok(());
    }
    for record in records.by_ref() {
        let record = record?;
        if !filter.matches(&record) {
            continue;
        }
        let projected = project(record, schema).into_value();
        sink.write(&projected)?;
        *written += 1;
        if limit.is_some_and(|n| *written >= n) {
            debug!(limit = *written, "output limit reached");
            break;
        }
    }
    Ok(())
}
