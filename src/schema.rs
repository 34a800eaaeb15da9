//! Reference-schema model used to drive record projection.
//!
//! A schema is written as "loose JSON": a sample document whose leaves are
//! human-readable type names rather than values, for example
//!
//! ```text
//! {
//!     "word": "string",
//!     "pos": "string (optional)",
//!     "senses": [
//!         { "glosses": ["string"], "rank": number, },
//!     ],
//! }
//! ```
//!
//! [`SchemaModel::parse`] rewrites those annotations into neutral placeholder
//! values, drops trailing separators, and parses what is left as strict JSON.
//! Only the *shape* of the result matters: leaf values are never compared
//! against record values.
//!
//! # Notes
//! - Object key order is preserved; projected records follow it.
//! - An array contributes the shape of its **first** element. An empty example
//!   array carries no element shape and is treated as a leaf.
//! - [`load_schema`] never fails: a missing or unparseable schema yields `None`,
//!   which the projector treats as "keep everything".

use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{info, warn};

static OPTIONAL_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""string\s*\([^)]*\)""#).expect("valid regex"));
static PLAIN_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""string""#).expect("valid regex"));
static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([:\[,]\s*)number\b").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

/// Number of characters of normalized schema text echoed in parse warnings.
const PREVIEW_CHARS: usize = 200;

/// Failure to turn schema text into a [`SchemaModel`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("could not read schema {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse schema as JSON: {source}")]
    Parse {
        /// The normalized text that failed strict parsing.
        normalized: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Structural template restricting which parts of a record survive projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaModel {
    /// Allowed keys, in schema order, each with the shape of its value.
    Object(Vec<(String, SchemaModel)>),
    /// Shape applied to every element of a sequence.
    ArrayOf(Box<SchemaModel>),
    /// A leaf; the value underneath is kept as-is.
    Scalar,
}

impl SchemaModel {
    /// Parse lenient schema text.
    ///
    /// # Errors
    /// Returns [`SchemaError::Parse`] if the text is not valid JSON once type
    /// annotations and trailing commas have been normalized.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let normalized = normalize(text);
        match serde_json::from_str::<Value>(&normalized) {
            Ok(doc) => Ok(Self::from_example(&doc)),
            Err(source) => Err(SchemaError::Parse { normalized, source }),
        }
    }

    /// Build a model from an example document.
    pub fn from_example(doc: &Value) -> Self {
        match doc {
            Value::Object(map) => SchemaModel::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_example(v)))
                    .collect(),
            ),
            Value::Array(items) => match items.first() {
                Some(first) => SchemaModel::ArrayOf(Box::new(Self::from_example(first))),
                None => SchemaModel::Scalar,
            },
            _ => SchemaModel::Scalar,
        }
    }

    /// Top-level keys, in schema order. Empty unless the model is an object.
    pub fn top_level_keys(&self) -> Vec<&str> {
        match self {
            SchemaModel::Object(fields) => fields.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Look up the sub-schema for `key` when this is an object schema.
    pub fn field(&self, key: &str) -> Option<&SchemaModel> {
        match self {
            SchemaModel::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, s)| s),
            _ => None,
        }
    }
}

/// Rewrite type annotations into placeholder JSON values.
///
/// `"string (optional)"` and `"string"` become `""`, a bare `number` in value
/// position becomes `0`, and a comma directly before `}` or `]` is dropped.
pub fn normalize(text: &str) -> String {
    let text = OPTIONAL_STRING.replace_all(text, r#""""#);
    let text = PLAIN_STRING.replace_all(&text, r#""""#);
    let text = BARE_NUMBER.replace_all(&text, "${1}0");
    TRAILING_COMMA.replace_all(&text, "$1").into_owned()
}

/// Read and parse a schema file without failing the run.
///
/// Returns `None` (pass-through mode) when the file cannot be read or parsed;
/// the reason is logged as a warning.
pub fn load_schema(path: impl AsRef<Path>) -> Option<SchemaModel> {
    match try_load_schema(path) {
        Ok(schema) => {
            let mut keys = schema.top_level_keys();
            keys.sort_unstable();
            info!(fields = ?keys, "filtering to schema fields");
            Some(schema)
        }
        Err(err) => {
            warn!(error = %err, "using pass-through mode (no filtering)");
            if let SchemaError::Parse { normalized, .. } = &err {
                let preview: String = normalized.chars().take(PREVIEW_CHARS).collect();
                warn!(preview = %preview, "first {PREVIEW_CHARS} chars of cleaned schema");
            }
            None
        }
    }
}

/// Read and parse a schema file, surfacing the failure reason.
///
/// # Errors
/// Returns [`SchemaError::Read`] on I/O failure and [`SchemaError::Parse`] when
/// the normalized text is not valid JSON.
pub fn try_load_schema(path: impl AsRef<Path>) -> Result<SchemaModel, SchemaError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| SchemaError::Read {
        path: path.display().to_string(),
        source,
    })?;
    SchemaModel::parse(&text)
}
