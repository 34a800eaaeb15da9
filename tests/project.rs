use anyhow::Result;
use dictfilter::project::{Projection, project};
use dictfilter::schema::SchemaModel;
use dictfilter::testing::{SAMPLE_SCHEMA, entry};
use serde_json::{Value, json};

/// Every key in `out` must exist at the same path in both `input` and `schema`.
fn assert_restricted(out: &Value, input: &Value, schema: &SchemaModel, path: &str) {
    match (schema, out) {
        (SchemaModel::Object(_), Value::Object(map)) => {
            for (k, v) in map {
                let sub = schema
                    .field(k)
                    .unwrap_or_else(|| panic!("{path}.{k} not in schema"));
                let src = input
                    .get(k)
                    .unwrap_or_else(|| panic!("{path}.{k} not in input"));
                assert_restricted(v, src, sub, &format!("{path}.{k}"));
            }
        }
        (SchemaModel::ArrayOf(element), Value::Array(items)) => {
            let src = input.as_array().expect("input array");
            assert_eq!(items.len(), src.len(), "{path}: array length changed");
            for (i, (o, s)) in items.iter().zip(src).enumerate() {
                assert_restricted(o, s, element, &format!("{path}[{i}]"));
            }
        }
        _ => assert_eq!(out, input, "{path}: leaf changed"),
    }
}

#[test]
fn output_follows_schema_key_order() -> Result<()> {
    let schema = SchemaModel::parse(r#"{"b":"", "a":""}"#)?;
    let out = project(json!({"a": 1, "b": 2, "c": 3}), Some(&schema)).into_value();
    assert_eq!(serde_json::to_string(&out)?, r#"{"b":2,"a":1}"#);
    Ok(())
}

#[test]
fn missing_schema_passes_through() {
    let record = entry("chat", "fr", "noun");
    let out = project(record.clone(), None);
    assert!(out.is_passed_through());
    assert_eq!(out.into_value(), record);
}

#[test]
fn nested_fields_are_dropped() -> Result<()> {
    let schema = SchemaModel::parse(SAMPLE_SCHEMA)?;
    let out = project(entry("chat", "fr", "noun"), Some(&schema));
    assert!(matches!(out, Projection::Projected(_)));
    assert_eq!(
        out.into_value(),
        json!({
            "word": "chat",
            "pos": "noun",
            "senses": [
                { "glosses": ["Sens premier de chat."], "tags": ["familiar"] },
                { "glosses": ["Sens figuré de chat."] },
            ],
            "sounds": [{ "ipa": "/ʃa/" }],
        })
    );
    Ok(())
}

#[test]
fn projection_is_a_structural_restriction() -> Result<()> {
    let schema = SchemaModel::parse(SAMPLE_SCHEMA)?;
    let inputs = vec![
        entry("chat", "fr", "noun"),
        json!({"word": "x", "senses": "not an array", "extra": {"deep": [1, 2]}}),
        json!({"senses": [{"glosses": "scalar where array expected"}, 3, null]}),
        json!({}),
    ];
    for input in inputs {
        let out = project(input.clone(), Some(&schema)).into_value();
        assert_restricted(&out, &input, &schema, "$");
    }
    Ok(())
}

#[test]
fn arrays_keep_length_and_order() -> Result<()> {
    let schema = SchemaModel::parse(r#"[{"k": ""}]"#)?;
    let input = json!([{"k": 1, "x": 1}, {"x": 2}, {"k": 3}, 4]);
    let out = project(input, Some(&schema)).into_value();
    assert_eq!(out, json!([{"k": 1}, {}, {"k": 3}, 4]));
    Ok(())
}

#[test]
fn empty_input_array_stays_empty() -> Result<()> {
    let schema = SchemaModel::parse(r#"{"senses": [{"glosses": ""}]}"#)?;
    let out = project(json!({"senses": []}), Some(&schema)).into_value();
    assert_eq!(out, json!({"senses": []}));
    Ok(())
}

#[test]
fn empty_schema_array_keeps_elements_whole() -> Result<()> {
    let schema = SchemaModel::parse(r#"{"forms": []}"#)?;
    let input = json!({"forms": [{"form": "chats", "tags": ["plural"]}], "other": 1});
    let out = project(input, Some(&schema)).into_value();
    assert_eq!(out, json!({"forms": [{"form": "chats", "tags": ["plural"]}]}));
    Ok(())
}

#[test]
fn shape_mismatch_passes_value_through() -> Result<()> {
    let schema = SchemaModel::parse(r#"{"senses": [{"glosses": ""}], "head": {"a": ""}}"#)?;
    let input = json!({"senses": {"glosses": 1, "x": 2}, "head": "plain"});
    let out = project(input.clone(), Some(&schema)).into_value();
    assert_eq!(out, input);

    let top = project(json!("just a string"), Some(&schema));
    assert!(top.is_passed_through());
    assert_eq!(top.value(), &json!("just a string"));
    Ok(())
}

#[test]
fn scalar_schema_keeps_structured_values() -> Result<()> {
    let schema = SchemaModel::parse(r#"{"meta": "string"}"#)?;
    let out = project(json!({"meta": {"a": [1, 2]}, "x": 0}), Some(&schema)).into_value();
    assert_eq!(out, json!({"meta": {"a": [1, 2]}}));
    Ok(())
}
