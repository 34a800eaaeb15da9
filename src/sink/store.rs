//! SQLite store with batched writes and two full-text indexes over `word`.
//!
//! # Layout
//!
//! ```text
//! entries            id INTEGER PRIMARY KEY AUTOINCREMENT, word, pos, data (JSON)
//! idx_word           B-tree index on entries(word)         exact / range lookups
//! entries_fts        FTS5, unicode61 tokenizer + prefix    token-prefix search
//! entries_trigram    FTS5, trigram tokenizer               substring search
//! ```
//!
//! Both FTS5 tables are *external content* tables: they store only the index and
//! read `word` back from `entries` by rowid. SQLite does not keep such tables
//! current on its own, so three triggers do it:
//!
//! - `entries_ai`: after insert, index `(new.id, new.word)` in both tables;
//! - `entries_ad`: after delete, issue the FTS5 `'delete'` command for
//!   `(old.id, old.word)` in both tables;
//! - `entries_au`: after update, delete the old pair and index the new one.
//!
//! As a result, outside an open transaction, every live `entries` row has exactly
//! one entry in each FTS table under its own id, and no other ids are indexed.
//! [`StoreReader::verify_indexes`] checks this with FTS5's `integrity-check`.
//!
//! # Batching
//!
//! [`StoreSink::write`] only buffers. Every `batch_size` records (100 by default)
//! the buffer is inserted in one transaction and committed, so at most
//! `batch_size - 1` records are pending at any time. [`StoreSink::close`]
//! flushes the remainder. A failed flush rolls the whole batch back, drops it,
//! and leaves the sink refusing further work; nothing is ever retried.

use crate::sink::RecordSink;
use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Records buffered before a flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Minimum fragment length the trigram index can answer directly.
const TRIGRAM_MIN_CHARS: usize = 3;

/// Files SQLite may leave next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

const SCHEMA_SQL: &str = r#"
CREATE TABLE entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL,
    pos TEXT,
    data TEXT NOT NULL
);

CREATE INDEX idx_word ON entries(word);

CREATE VIRTUAL TABLE entries_fts USING fts5(
    word,
    content='entries',
    content_rowid='id',
    prefix='2 3'
);

CREATE VIRTUAL TABLE entries_trigram USING fts5(
    word,
    content='entries',
    content_rowid='id',
    tokenize='trigram'
);

CREATE TRIGGER entries_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, word) VALUES (new.id, new.word);
    INSERT INTO entries_trigram(rowid, word) VALUES (new.id, new.word);
END;

CREATE TRIGGER entries_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, word) VALUES ('delete', old.id, old.word);
    INSERT INTO entries_trigram(entries_trigram, rowid, word) VALUES ('delete', old.id, old.word);
END;

CREATE TRIGGER entries_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, word) VALUES ('delete', old.id, old.word);
    INSERT INTO entries_trigram(entries_trigram, rowid, word) VALUES ('delete', old.id, old.word);
    INSERT INTO entries_fts(rowid, word) VALUES (new.id, new.word);
    INSERT INTO entries_trigram(rowid, word) VALUES (new.id, new.word);
END;
"#;

const INSERT_ENTRY: &str = "INSERT INTO entries (word, pos, data) VALUES (?1, ?2, ?3)";

/// One buffered row.
#[derive(Debug, Clone)]
struct PendingEntry {
    word: String,
    pos: String,
    data: String,
}

impl PendingEntry {
    fn from_record(record: &Value) -> Result<Self> {
        let text_field = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(Self {
            word: text_field("word"),
            pos: text_field("pos"),
            data: serde_json::to_string(record).context("serialize record for store")?,
        })
    }
}

/// Batched writer for the SQLite store.
pub struct StoreSink {
    conn: Connection,
    path: PathBuf,
    batch: Vec<PendingEntry>,
    batch_size: usize,
    written: u64,
    failed: bool,
}

impl StoreSink {
    /// Create a fresh store at `path` with the default batch size.
    ///
    /// Any existing database at `path` is deleted first; there is no append mode.
    ///
    /// # Errors
    /// Returns an error if the old store cannot be removed or the new one cannot
    /// be created and initialized.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_batch_size(path, DEFAULT_BATCH_SIZE)
    }

    /// Like [`StoreSink::create`] with a custom batch size (at least 1).
    ///
    /// # Errors
    /// See [`StoreSink::create`].
    pub fn with_batch_size(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        remove_existing_store(path)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }

        let mut conn =
            Connection::open(path).with_context(|| format!("open store {}", path.display()))?;
        let tx = conn.transaction().context("begin schema transaction")?;
        tx.execute_batch(SCHEMA_SQL)
            .with_context(|| format!("create store schema in {}", path.display()))?;
        tx.commit().context("commit store schema")?;

        let batch_size = batch_size.max(1);
        info!(path = %path.display(), batch_size, "store initialized");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            batch: Vec::with_capacity(batch_size),
            batch_size,
            written: 0,
            failed: false,
        })
    }

    /// Buffer one record; flushes when the batch is full.
    ///
    /// `word` and `pos` are taken from the record's top-level string fields and
    /// default to empty text.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized or a triggered flush
    /// fails.
    pub fn write(&mut self, record: &Value) -> Result<()> {
        self.ensure_usable()?;
        self.batch.push(PendingEntry::from_record(record)?);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Insert every buffered record in a single transaction and clear the buffer.
    /// Does nothing when the buffer is empty.
    ///
    /// A failed flush is final: the transaction is rolled back, the batch is
    /// discarded, and every later `write`, `flush` or `close` returns an error
    /// without touching the database again.
    ///
    /// # Errors
    /// Returns an error if any insert or the commit fails, or if an earlier
    /// flush failed.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.batch.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.insert_batch() {
            self.failed = true;
            warn!(rows = self.batch.len(), "batch rolled back and discarded");
            self.batch.clear();
            return Err(err);
        }
        self.written += self.batch.len() as u64;
        debug!(rows = self.batch.len(), total = self.written, "batch flushed");
        self.batch.clear();
        Ok(())
    }

    fn insert_batch(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("begin batch transaction")?;
        {
            let mut stmt = tx.prepare_cached(INSERT_ENTRY).context("prepare insert")?;
            for entry in &self.batch {
                stmt.execute(params![entry.word, entry.pos, entry.data])
                    .with_context(|| format!("insert entry {:?}", entry.word))?;
            }
        }
        tx.commit()
            .with_context(|| format!("commit batch of {} entries", self.batch.len()))
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.failed {
            bail!(
                "store {} is unusable after a failed batch flush",
                self.path.display()
            );
        }
        Ok(())
    }

    /// Rows committed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Records buffered and not yet committed.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the remaining batch and close the database.
    ///
    /// Returns the total number of rows written. After a failed flush the
    /// connection is still closed, but nothing is inserted and an error is
    /// returned.
    ///
    /// # Errors
    /// Returns an error if an earlier flush failed, or if the final flush or
    /// closing the connection fails.
    pub fn close(mut self) -> Result<u64> {
        let flushed = self.flush();
        let StoreSink {
            conn,
            path,
            written,
            ..
        } = self;
        let closed = conn
            .close()
            .map_err(|(_, e)| e)
            .with_context(|| format!("close store {}", path.display()));
        flushed?;
        closed?;
        info!(path = %path.display(), rows = written, "store closed");
        Ok(written)
    }
}

impl RecordSink for StoreSink {
    fn write(&mut self, record: &Value) -> Result<()> {
        StoreSink::write(self, record)
    }

    fn close(self: Box<Self>) -> Result<()> {
        StoreSink::close(*self).map(|_| ())
    }

    fn describe(&self) -> String {
        format!("SQLite store {}", self.path.display())
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_existing_store(path: &Path) -> Result<()> {
    let sidecars = SIDECAR_SUFFIXES.iter().map(|s| sidecar_path(path, s));
    for p in std::iter::once(path.to_path_buf()).chain(sidecars) {
        if p.exists() {
            fs::remove_file(&p).with_context(|| format!("remove existing {}", p.display()))?;
            debug!(path = %p.display(), "removed existing store file");
        }
    }
    Ok(())
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEntry {
    pub id: i64,
    pub word: String,
    pub pos: String,
    pub data: Value,
}

/// Query access to a store produced by [`StoreSink`].
pub struct StoreReader {
    conn: Connection,
}

impl StoreReader {
    /// Open an existing store. The file must exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("store {} does not exist", path.display());
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("open store {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Number of rows in `entries`.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
            .context("count entries")?;
        Ok(n as u64)
    }

    /// Ids of rows whose `word` equals `word` exactly.
    pub fn lookup(&self, word: &str) -> Result<Vec<i64>> {
        self.ids(
            "SELECT id FROM entries WHERE word = ?1 ORDER BY id",
            params![word],
        )
    }

    /// Ids of rows with a `word` token starting with `prefix`.
    ///
    /// Uses the unicode61-tokenized index, so matching is per token and
    /// case-insensitive: `"ter"` finds `"pomme de terre"`. An empty prefix
    /// matches every row.
    pub fn search_prefix(&self, prefix: &str) -> Result<Vec<i64>> {
        if prefix.trim().is_empty() {
            return self.ids("SELECT id FROM entries ORDER BY id", params![]);
        }
        self.ids(
            "SELECT rowid FROM entries_fts WHERE entries_fts MATCH ?1 ORDER BY rowid",
            params![format!("{}*", fts_phrase(prefix))],
        )
    }

    /// Ids of rows whose `word` contains `fragment` (case-insensitive).
    ///
    /// Fragments of three or more characters are answered by the trigram index;
    /// shorter ones fall back to `LIKE` over the same table. An empty fragment
    /// matches every row.
    pub fn search_substring(&self, fragment: &str) -> Result<Vec<i64>> {
        if fragment.is_empty() {
            return self.ids("SELECT id FROM entries ORDER BY id", params![]);
        }
        if fragment.chars().count() >= TRIGRAM_MIN_CHARS {
            self.ids(
                "SELECT rowid FROM entries_trigram WHERE entries_trigram MATCH ?1 ORDER BY rowid",
                params![fts_phrase(fragment)],
            )
        } else {
            self.ids(
                r"SELECT rowid FROM entries_trigram WHERE word LIKE ?1 ESCAPE '\' ORDER BY rowid",
                params![format!("%{}%", escape_like(fragment))],
            )
        }
    }

    /// Fetch one row by id.
    pub fn entry(&self, id: i64) -> Result<Option<StoredEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, word, COALESCE(pos, ''), data FROM entries WHERE id = ?1",
                [id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("fetch entry {id}"))?;
        let Some((id, word, pos, data)) = row else {
            return Ok(None);
        };
        let data = serde_json::from_str(&data).with_context(|| format!("decode entry {id}"))?;
        Ok(Some(StoredEntry { id, word, pos, data }))
    }

    /// Check both full-text indexes against the `entries` table.
    ///
    /// # Errors
    /// Returns an error naming the first index found out of sync.
    pub fn verify_indexes(&self) -> Result<()> {
        for table in ["entries_fts", "entries_trigram"] {
            self.conn
                .execute(
                    &format!("INSERT INTO {table}({table}, rank) VALUES ('integrity-check', 1)"),
                    [],
                )
                .with_context(|| format!("integrity check of {table}"))?;
        }
        Ok(())
    }

    /// The underlying connection, for ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn ids<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .with_context(|| format!("prepare {sql}"))?;
        let rows = stmt.query_map(params, |r| r.get::<_, i64>(0))?;
        let ids = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("run {sql}"))?;
        Ok(ids)
    }
}

/// Quote `text` as a single FTS5 phrase.
fn fts_phrase(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
