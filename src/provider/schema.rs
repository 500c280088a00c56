//! Structured-output schemas
//!
//! Strict-mode normalization runs once when a [`StructuredSchema`] is built,
//! never per request. Responses are then checked against the normalized form.

use crate::error::ForgeError;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Strict-mode transform: every object schema gets `additionalProperties: false`
/// and lists all of its properties as required. Pure; applied recursively.
pub fn normalize_strict(schema: &Value) -> Value {
    let mut normalized = schema.clone();
    normalize_in_place(&mut normalized);
    normalized
}

fn normalize_in_place(node: &mut Value) {
    match node {
        Value::Object(obj) => {
            let is_object_schema =
                obj.get("type").and_then(Value::as_str) == Some("object") || obj.contains_key("properties");
            if is_object_schema {
                obj.insert("additionalProperties".to_string(), Value::Bool(false));
                let names: Vec<String> = obj
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().collect())
                    .unwrap_or_default();
                if obj.contains_key("properties") {
                    let required = obj
                        .entry("required")
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(list) = required {
                        for name in names {
                            if !list.iter().any(|v| v.as_str() == Some(name.as_str())) {
                                list.push(Value::String(name));
                            }
                        }
                    }
                }
            }
            if let Some(Value::Object(props)) = obj.get_mut("properties") {
                props.values_mut().for_each(normalize_in_place);
            }
            for key in ["$defs", "definitions"] {
                if let Some(Value::Object(defs)) = obj.get_mut(key) {
                    defs.values_mut().for_each(normalize_in_place);
                }
            }
            if let Some(items) = obj.get_mut("items") {
                normalize_in_place(items);
            }
            for key in ["anyOf", "oneOf", "allOf"] {
                if let Some(Value::Array(options)) = obj.get_mut(key) {
                    options.iter_mut().for_each(normalize_in_place);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_in_place),
        _ => {}
    }
}

/// A named, normalized response schema.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    name: String,
    schema: Value,
}

impl StructuredSchema {
    pub fn new(name: impl Into<String>, raw: &Value) -> Self {
        Self {
            name: name.into(),
            schema: normalize_strict(raw),
        }
    }

    /// Load `<dir>/<name>.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self, ForgeError> {
        let path = dir.join(format!("{}.json", name));
        let bytes = std::fs::read(&path).map_err(|e| {
            ForgeError::ConfigError(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        let raw: Value = serde_json::from_slice(&bytes)?;
        Ok(Self::new(name, &raw))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// `response_format` value sent to the LLM endpoint.
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "schema": self.schema,
                "strict": true,
            }
        })
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate_shape(&self.schema, value, "$")
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Structural check: types, required keys, enums, nested properties and array
/// items. Unknown keywords are ignored.
pub fn validate_shape(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    match schema.get("type") {
        Some(Value::String(t)) if !type_matches(t, value) => {
            return Err(format!("{}: expected {}", path, t));
        }
        Some(Value::Array(types)) => {
            let ok = types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value));
            if !ok {
                return Err(format!("{}: type not allowed", path));
            }
        }
        _ => {}
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(format!("{}: value not in enum", path));
        }
    }

    if let Some(Value::Array(options)) = schema.get("anyOf") {
        if !options.iter().any(|opt| validate_shape(opt, value, path).is_ok()) {
            return Err(format!("{}: no anyOf branch matched", path));
        }
    }

    if let Value::Object(obj) = value {
        let empty = Map::new();
        let props = schema
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("{}: missing required field '{}'", path, key));
                }
            }
        }
        for (key, sub) in props {
            if let Some(child) = obj.get(key) {
                validate_shape(sub, child, &format!("{}.{}", path, key))?;
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_shape(item_schema, item, &format!("{}[{}]", path, i))?;
        }
    }
    Ok(())
}
