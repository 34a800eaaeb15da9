//! # dictfilter
//!
//! Trim dictionary extracts (one JSON object per line, as produced by
//! Wiktionary dump extractors) down to the fields named in a reference schema,
//! and write the result either as JSON Lines or as a SQLite database with
//! full-text indexes over the headword.
//!
//! ## Pipeline
//!
//! ```text
//! JsonlSource ──> TagFilter ──> project(schema) ──> RecordSink ──> compress_store
//!  (lazy lines)   (lang_code)    (schema order)     Stream|Store    (store only)
//! ```
//!
//! 1. [`JsonlSource`] decodes one record per line, decompressing the input if
//!    needed.
//! 2. [`TagFilter`] keeps only records whose tag field (by default `lang_code`)
//!    equals the configured value.
//! 3. [`project`] restricts each record to the shape of the [`SchemaModel`].
//! 4. A [`RecordSink`] stores it: [`StreamSink`] for JSON Lines, [`StoreSink`]
//!    for SQLite.
//! 5. For stores, [`compress_store`] can replace the database by a compressed
//!    artifact once it is closed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dictfilter::*;
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::new(OutputMode::store("fr.db"))
//!     .with_input("fr-extract.jsonl")
//!     .with_schema("schema.json")
//!     .with_limit(Some(1000));
//! let summary = Runner::new(config).run()?;
//! println!("read {} lines, wrote {}", summary.lines_read, summary.records_written);
//!
//! let store = StoreReader::open("fr.db")?;
//! let ids = store.search_substring("chat")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`schema`] - lenient schema parsing into a [`SchemaModel`]
//! - [`project`] - schema-driven record projection
//! - [`io`] - JSONL reading/writing and compression codecs
//! - [`sink`] - stream and SQLite sinks, plus [`StoreReader`] queries
//! - [`config`] - immutable run configuration
//! - [`runner`] - the driver tying it all together
//! - [`testing`] - fixtures for tests

pub mod config;
pub mod io;
pub mod project;
pub mod runner;
pub mod schema;
pub mod sink;
pub mod testing;

pub use config::{OutputMode, PipelineConfig, TagFilter};
pub use io::compression::{CompressionReport, compress_store, decompress_artifact};
pub use io::jsonl::{JsonlRecords, JsonlSource};
pub use project::{Projection, project};
pub use runner::{RunSummary, Runner, drive};
pub use schema::{SchemaError, SchemaModel, load_schema};
pub use sink::{RecordSink, StoreReader, StoreSink, StreamSink};
