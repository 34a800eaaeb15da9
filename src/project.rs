//! Schema-driven record projection.
//!
//! [`project`] restricts a decoded record to the shape of a [`SchemaModel`]:
//!
//! - **Object** schemas keep only the keys they list, in *schema* order, and
//!   recurse into each kept value.
//! - **ArrayOf** schemas map every element of a sequence through the element
//!   schema, preserving length and order.
//! - **Scalar** schemas keep the value untouched.
//!
//! Projection is total. A missing schema, or a record whose shape does not match
//! the schema at some path (an object where an array was expected, a string
//! where an object was expected, ...), is passed through unchanged at that path
//! instead of producing an error.

use crate::schema::SchemaModel;
use serde_json::{Map, Value};

/// Outcome of projecting one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// The record was restricted to the schema's shape.
    Projected(Value),
    /// The record came back unchanged: no schema, a scalar schema, or a
    /// top-level shape mismatch.
    PassedThrough(Value),
}

impl Projection {
    /// The resulting record, whichever way it was produced.
    pub fn into_value(self) -> Value {
        match self {
            Projection::Projected(v) | Projection::PassedThrough(v) => v,
        }
    }

    /// Borrow the resulting record.
    pub fn value(&self) -> &Value {
        match self {
            Projection::Projected(v) | Projection::PassedThrough(v) => v,
        }
    }

    pub fn is_passed_through(&self) -> bool {
        matches!(self, Projection::PassedThrough(_))
    }
}

/// Restrict `record` to the shape of `schema`.
///
/// `None` means pass-through: the record is returned as-is.
///
/// # Examples
/// ```
/// use dictfilter::project::project;
/// use dictfilter::schema::SchemaModel;
/// use serde_json::json;
///
/// let schema = SchemaModel::parse(r#"{"b": "string", "a": "string"}"#).unwrap();
/// let out = project(json!({"a": 1, "b": 2, "c": 3}), Some(&schema)).into_value();
/// assert_eq!(serde_json::to_string(&out).unwrap(), r#"{"b":2,"a":1}"#);
/// ```
pub fn project(record: Value, schema: Option<&SchemaModel>) -> Projection {
    let Some(schema) = schema else {
        return Projection::PassedThrough(record);
    };
    match (schema, record) {
        (SchemaModel::Object(fields), Value::Object(map)) => {
            Projection::Projected(Value::Object(project_object(map, fields)))
        }
        (SchemaModel::ArrayOf(element), Value::Array(items)) => {
            Projection::Projected(Value::Array(project_array(items, element)))
        }
        (_, other) => Projection::PassedThrough(other),
    }
}

fn project_value(value: Value, schema: &SchemaModel) -> Value {
    match (schema, value) {
        (SchemaModel::Object(fields), Value::Object(map)) => {
            Value::Object(project_object(map, fields))
        }
        (SchemaModel::ArrayOf(element), Value::Array(items)) => {
            Value::Array(project_array(items, element))
        }
        (_, other) => other,
    }
}

fn project_object(mut map: Map<String, Value>, fields: &[(String, SchemaModel)]) -> Map<String, Value> {
    let mut out = Map::with_capacity(fields.len());
    for (key, sub) in fields {
        if let Some(v) = map.remove(key) {
            out.insert(key.clone(), project_value(v, sub));
        }
    }
    out
}

fn project_array(items: Vec<Value>, element: &SchemaModel) -> Vec<Value> {
    items.into_iter().map(|v| project_value(v, element)).collect()
}
