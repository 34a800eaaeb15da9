//! Run configuration.
//!
//! A [`PipelineConfig`] is built once (by the CLI or by a test) and handed to the
//! [`Runner`](crate::runner::Runner); nothing mutates it afterwards.

use crate::sink::store::DEFAULT_BATCH_SIZE;
use serde_json::Value;
use std::path::PathBuf;

/// Input file used when none is given.
pub const DEFAULT_INPUT: &str = "fr-extract.jsonl";
/// Schema file used when none is given.
pub const DEFAULT_SCHEMA: &str = "schema.json";
/// Record field compared by the default [`TagFilter`].
pub const DEFAULT_TAG_FIELD: &str = "lang_code";
/// Value the default [`TagFilter`] requires.
pub const DEFAULT_TAG_VALUE: &str = "fr";

/// Exact-match predicate on one top-level string field.
///
/// Records where the field is missing, not a string, or different from
/// `value` are skipped before projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub field: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

impl Default for TagFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_FIELD, DEFAULT_TAG_VALUE)
    }
}

/// Where projected records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// JSON Lines to `output`, or to stdout when `None`.
    Stream { output: Option<PathBuf> },
    /// SQLite store at `db`, optionally compressed with the named codec once
    /// the run is complete.
    Store {
        db: PathBuf,
        batch_size: usize,
        compress: Option<String>,
    },
}

impl OutputMode {
    pub fn stdout() -> Self {
        OutputMode::Stream { output: None }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        OutputMode::Stream {
            output: Some(path.into()),
        }
    }

    pub fn store(db: impl Into<PathBuf>) -> Self {
        OutputMode::Store {
            db: db.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            compress: None,
        }
    }
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Stop after this many records have been written; `None` reads the whole input.
    pub limit: Option<u64>,
    pub input: PathBuf,
    pub schema: PathBuf,
    pub filter: TagFilter,
    pub output: OutputMode,
}

impl PipelineConfig {
    /// Defaults for everything but the output.
    pub fn new(output: OutputMode) -> Self {
        Self {
            limit: None,
            input: PathBuf::from(DEFAULT_INPUT),
            schema: PathBuf::from(DEFAULT_SCHEMA),
            filter: TagFilter::default(),
            output,
        }
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<PathBuf>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }
}
