//! Fixtures for testing pipelines without real dictionary dumps.
//!
//! ```
//! use dictfilter::testing::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let input = dir.path().join("in.jsonl");
//! write_jsonl(&input, &[entry("chat", "fr", "noun"), entry("cat", "en", "noun")]).unwrap();
//! ```

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A schema in the loose notation real extract schemas use: type names as
/// leaves, an optional annotation, and trailing commas.
pub const SAMPLE_SCHEMA: &str = r#"{
    "word": "string",
    "pos": "string",
    "senses": [
        {
            "glosses": ["string"],
            "tags": ["string (optional)"],
        },
    ],
    "sounds": [
        { "ipa": "string (optional)", },
    ],
}"#;

/// A dictionary entry with more fields than [`SAMPLE_SCHEMA`] keeps.
pub fn entry(word: &str, lang_code: &str, pos: &str) -> Value {
    json!({
        "word": word,
        "lang_code": lang_code,
        "lang": "Français",
        "pos": pos,
        "etymology_text": format!("De {word}."),
        "senses": [
            {
                "glosses": [format!("Sens premier de {word}.")],
                "tags": ["familiar"],
                "examples": [{ "text": format!("Un {word}.") }],
            },
            {
                "glosses": [format!("Sens figuré de {word}.")],
                "id": format!("{word}-2"),
            },
        ],
        "sounds": [{ "ipa": "/ʃa/", "audio": "x.ogg" }],
    })
}

/// `n` French entries named `mot0`, `mot1`, ...
pub fn numbered_entries(n: usize) -> Vec<Value> {
    (0..n).map(|i| entry(&format!("mot{i}"), "fr", "noun")).collect()
}

/// Write records as JSON Lines to `path`.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_jsonl(path: impl AsRef<Path>, records: &[Value]) -> Result<()> {
    let path = path.as_ref();
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    for record in records {
        serde_json::to_writer(&mut w, record)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

/// Read a JSON Lines file back, skipping blank lines.
///
/// # Errors
/// Returns an error if the file cannot be read or a line is not JSON.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<Value>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).with_context(|| format!("parse {l}")))
        .collect()
}
