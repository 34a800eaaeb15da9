use anyhow::Result;
use dictfilter::config::TagFilter;
use dictfilter::io::jsonl::JsonlRecords;
use dictfilter::runner::drive;
use dictfilter::sink::store::{DEFAULT_BATCH_SIZE, StoreReader, StoreSink};
use dictfilter::testing::{entry, numbered_entries};
use rusqlite::{Connection, params};
use serde_json::json;
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;

fn fts_ids(conn: &Connection, table: &str, word: &str) -> Result<Vec<i64>> {
    let sql = format!("SELECT rowid FROM {table} WHERE {table} MATCH ?1 ORDER BY rowid");
    let mut stmt = conn.prepare(&sql)?;
    let phrase = format!("\"{}\"", word.replace('"', "\"\""));
    let ids = stmt
        .query_map(params![phrase], |r| r.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn ids_containing(conn: &Connection, fragment: &str) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM entries WHERE instr(lower(word), lower(?1)) > 0 ORDER BY id")?;
    let ids = stmt
        .query_map(params![fragment], |r| r.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Both full-text tables agree with `entries` for every word it holds.
fn assert_indexes_consistent(path: &Path) -> Result<()> {
    let reader = StoreReader::open(path)?;
    reader.verify_indexes()?;
    let conn = reader.connection();

    let words: BTreeSet<String> = conn
        .prepare("SELECT DISTINCT word FROM entries")?
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<_>>()?;
    for word in &words {
        assert_eq!(
            fts_ids(conn, "entries_fts", word)?,
            reader.lookup(word)?,
            "prefix index out of sync for {word:?}"
        );
        // trigram queries need at least three characters
        if word.chars().count() >= 3 {
            assert_eq!(
                fts_ids(conn, "entries_trigram", word)?,
                ids_containing(conn, word)?,
                "trigram index out of sync for {word:?}"
            );
        }
    }
    Ok(())
}

fn write_store(path: &Path, n: usize) -> Result<u64> {
    let mut sink = StoreSink::create(path)?;
    for record in numbered_entries(n) {
        sink.write(&record)?;
    }
    sink.close()
}

#[test]
fn every_write_is_persisted_after_close() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    for n in [0, 1, 99, 100, 101, 250] {
        let path = tmp.path().join(format!("store-{n}.db"));
        assert_eq!(write_store(&path, n)?, n as u64, "n={n}");
        assert_eq!(StoreReader::open(&path)?.count()?, n as u64, "n={n}");
    }
    Ok(())
}

#[test]
fn batch_flushes_at_capacity() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::create(&path)?;
    assert_eq!(sink.batch_size(), DEFAULT_BATCH_SIZE);

    let records = numbered_entries(DEFAULT_BATCH_SIZE + 1);
    for r in &records[..DEFAULT_BATCH_SIZE - 1] {
        sink.write(r)?;
    }
    assert_eq!(sink.written(), 0);
    assert_eq!(sink.pending(), DEFAULT_BATCH_SIZE - 1);
    assert_eq!(StoreReader::open(&path)?.count()?, 0);

    sink.write(&records[DEFAULT_BATCH_SIZE - 1])?;
    assert_eq!(sink.written(), DEFAULT_BATCH_SIZE as u64);
    assert_eq!(sink.pending(), 0);
    assert_eq!(StoreReader::open(&path)?.count()?, DEFAULT_BATCH_SIZE as u64);

    sink.write(&records[DEFAULT_BATCH_SIZE])?;
    assert_eq!(sink.pending(), 1);
    assert_eq!(sink.close()?, DEFAULT_BATCH_SIZE as u64 + 1);
    Ok(())
}

#[test]
fn empty_flush_is_a_no_op() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::with_batch_size(&path, 10)?;
    sink.flush()?;
    sink.write(&json!({"word": "a"}))?;
    sink.flush()?;
    sink.flush()?;
    assert_eq!(sink.written(), 1);
    assert_eq!(sink.close()?, 1);
    Ok(())
}

#[test]
fn word_and_pos_default_to_empty_text() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::create(&path)?;
    let bare = json!({"senses": [{"glosses": ["x"]}]});
    let numeric = json!({"word": 42, "pos": null});
    sink.write(&bare)?;
    sink.write(&numeric)?;
    sink.write(&entry("chat", "fr", "noun"))?;
    sink.close()?;

    let reader = StoreReader::open(&path)?;
    let first = reader.entry(1)?.expect("row 1");
    assert_eq!((first.word.as_str(), first.pos.as_str()), ("", ""));
    assert_eq!(first.data, bare);
    let second = reader.entry(2)?.expect("row 2");
    assert_eq!(second.word, "");
    assert_eq!(second.data, numeric);
    let third = reader.entry(3)?.expect("row 3");
    assert_eq!((third.word.as_str(), third.pos.as_str()), ("chat", "noun"));
    assert!(reader.entry(4)?.is_none());
    Ok(())
}

#[test]
fn create_replaces_an_existing_store() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    write_store(&path, 5)?;
    write_store(&path, 2)?;

    let reader = StoreReader::open(&path)?;
    assert_eq!(reader.count()?, 2);
    assert_eq!(reader.lookup("mot0")?, vec![1]);
    assert_indexes_consistent(&path)
}

#[test]
fn indexes_track_every_row() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::with_batch_size(&path, 7)?;
    for r in numbered_entries(40) {
        sink.write(&r)?;
    }
    // duplicates must be indexed once per row
    sink.write(&entry("mot3", "fr", "verb"))?;
    sink.write(&entry("pomme de terre", "fr", "noun"))?;
    sink.close()?;

    assert_indexes_consistent(&path)?;
    let reader = StoreReader::open(&path)?;
    assert_eq!(reader.lookup("mot3")?, vec![4, 41]);
    Ok(())
}

#[test]
fn prefix_and_substring_search() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::create(&path)?;
    for word in ["pomme de terre", "pommier", "terrain", "chat", "Chaton", "100%"] {
        sink.write(&entry(word, "fr", "noun"))?;
    }
    sink.close()?;

    let reader = StoreReader::open(&path)?;
    assert_eq!(reader.search_prefix("pom")?, vec![1, 2]);
    assert_eq!(reader.search_prefix("ter")?, vec![1, 3]);
    assert_eq!(reader.search_prefix("chat")?, vec![4, 5]);
    assert_eq!(reader.search_prefix("errain")?, Vec::<i64>::new());
    assert_eq!(reader.search_prefix("")?.len(), 6);

    assert_eq!(reader.search_substring("omm")?, vec![1, 2]);
    assert_eq!(reader.search_substring("errain")?, vec![3]);
    assert_eq!(reader.search_substring("HAT")?, vec![4, 5]);
    assert_eq!(reader.search_substring("at")?, vec![4, 5]);
    assert_eq!(reader.search_substring("0%")?, vec![6]);
    assert_eq!(reader.search_substring("zz")?, Vec::<i64>::new());
    Ok(())
}

#[test]
fn triggers_follow_updates_and_deletes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::create(&path)?;
    for word in ["pomme", "pommier", "poire"] {
        sink.write(&entry(word, "fr", "noun"))?;
    }
    sink.close()?;

    {
        let conn = Connection::open(&path)?;
        conn.execute("UPDATE entries SET word = 'zèbre' WHERE id = 1", [])?;
        conn.execute("DELETE FROM entries WHERE id = 2", [])?;
    }

    assert_indexes_consistent(&path)?;
    let reader = StoreReader::open(&path)?;
    assert_eq!(reader.search_prefix("pom")?, Vec::<i64>::new());
    assert_eq!(reader.search_substring("omm")?, Vec::<i64>::new());
    assert_eq!(reader.search_prefix("zè")?, vec![1]);
    assert_eq!(reader.search_substring("bre")?, vec![1]);
    assert_eq!(reader.search_substring("poi")?, vec![3]);
    Ok(())
}

#[test]
fn failed_flush_persists_nothing_from_the_batch() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let mut sink = StoreSink::with_batch_size(&path, 3)?;
    for word in ["alpha", "beta", "gamma"] {
        sink.write(&json!({"word": word}))?;
    }
    assert_eq!(sink.written(), 3);

    {
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON entries
             WHEN new.word = 'boom' BEGIN SELECT RAISE(ABORT, 'boom rejected'); END;",
        )?;
    }

    sink.write(&json!({"word": "delta"}))?;
    sink.write(&json!({"word": "boom"}))?;
    let err = sink.write(&json!({"word": "epsilon"})).unwrap_err();
    assert!(format!("{err:#}").contains("boom rejected"), "{err:#}");
    assert_eq!(sink.written(), 3);
    assert_eq!(sink.pending(), 0);

    // with the obstacle gone, a retry would now succeed; none may happen
    Connection::open(&path)?.execute_batch("DROP TRIGGER reject_boom;")?;
    assert!(sink.write(&json!({"word": "zeta"})).is_err());
    assert!(sink.flush().is_err());
    let err = sink.close().unwrap_err();
    assert!(err.to_string().contains("failed batch flush"), "{err:#}");

    let reader = StoreReader::open(&path)?;
    assert_eq!(reader.count()?, 3);
    for word in ["delta", "boom", "epsilon", "zeta"] {
        assert!(reader.lookup(word)?.is_empty(), "{word} was stored");
    }
    assert_indexes_consistent(&path)
}

#[test]
fn failed_flush_fails_the_run_and_keeps_earlier_batches() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("store.db");
    let sink = StoreSink::with_batch_size(&path, 2)?;
    Connection::open(&path)?.execute_batch(
        "CREATE TRIGGER reject_mot3 BEFORE INSERT ON entries
         WHEN new.word = 'mot3' BEGIN SELECT RAISE(ABORT, 'mot3 rejected'); END;",
    )?;

    let mut text = String::new();
    for r in numbered_entries(6) {
        text.push_str(&serde_json::to_string(&r)?);
        text.push('\n');
    }
    let mut records = JsonlRecords::new(Cursor::new(text), "memory");
    let err = drive(&mut records, &TagFilter::default(), None, Box::new(sink), None).unwrap_err();

    assert!(format!("{err:#}").contains("mot3 rejected"), "{err:#}");
    assert_eq!(records.lines_read(), 4);
    let reader = StoreReader::open(&path)?;
    assert_eq!(reader.count()?, 2);
    assert_eq!(reader.lookup("mot2")?, Vec::<i64>::new());
    Ok(())
}

#[test]
fn reader_requires_an_existing_store() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(StoreReader::open(tmp.path().join("nope.db")).is_err());
}
