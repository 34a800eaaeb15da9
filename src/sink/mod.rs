//! Output targets for projected records.
//!
//! Both sinks implement [`RecordSink`], which is all the [`Runner`](crate::runner::Runner)
//! needs to know about them:
//!
//! - [`StreamSink`]: one compact JSON line per record, to stdout or a file.
//! - [`StoreSink`]: batched inserts into a SQLite store with exact, prefix and
//!   substring indexes over the `word` field.
//!
//! `close` consumes the sink, so nothing can be written after it.

pub mod store;
pub mod stream;

pub use store::{StoreReader, StoreSink};
pub use stream::StreamSink;

use anyhow::Result;
use serde_json::Value;

/// A destination for projected records.
pub trait RecordSink {
    /// Accept one projected record.
    fn write(&mut self, record: &Value) -> Result<()>;

    /// Flush anything pending and release the destination.
    fn close(self: Box<Self>) -> Result<()>;

    /// Short human-readable description of the destination.
    fn describe(&self) -> String;
}
