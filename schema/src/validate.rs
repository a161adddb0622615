//! Structural validation of decoded YAML/JSON documents against a compiled
//! [`JsonSchemaProps`] tree, including `x-kubernetes-validations`.

use std::fmt;

use regex::Regex;
use serde_json::Value as Json;

use protocrd_cel::{evaluate_rule, Value};

use crate::props::{as_f64, JsonSchemaProps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path:    String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<root>: {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validates `value` against `schema`, returning every violation found.
/// An empty result means the document is accepted.
pub fn validate(schema: &JsonSchemaProps, value: &Json) -> Vec<Violation> {
    validate_at(schema, value, "")
}

/// Like [`validate`], reporting paths relative to `root`.
pub fn validate_at(schema: &JsonSchemaProps, value: &Json, root: &str) -> Vec<Violation> {
    let mut out = Vec::new();
    check(schema, value, root, &mut out);
    out
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn push(out: &mut Vec<Violation>, path: &str, message: String) {
    out.push(Violation { path: path.to_string(), message });
}

fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null      => "null",
        Json::Bool(_)   => "boolean",
        Json::Number(n) => if n.is_f64() { "number" } else { "integer" },
        Json::String(_) => "string",
        Json::Array(_)  => "array",
        Json::Object(_) => "object",
    }
}

fn type_matches(expected: &str, value: &Json) -> bool {
    match expected {
        "integer" => value.is_i64() || value.is_u64(),
        "number"  => value.is_number(),
        "string"  => value.is_string(),
        "boolean" => value.is_boolean(),
        "object"  => value.is_object(),
        "array"   => value.is_array(),
        _ => false,
    }
}

fn check(schema: &JsonSchemaProps, value: &Json, path: &str, out: &mut Vec<Violation>) {
    if value.is_null() {
        if !schema.nullable && schema.type_.is_some() {
            push(out, path, "must not be null".to_string());
        }
        return;
    }

    // 1) Type
    if schema.int_or_string {
        if !(value.is_string() || value.is_i64() || value.is_u64()) {
            push(out, path, format!("must be an integer or a string, got {}", json_type(value)));
            return;
        }
    } else if let Some(ref expected) = schema.type_ {
        if !type_matches(expected, value) {
            push(out, path, format!("must be of type {}, got {}", expected, json_type(value)));
            return;
        }
    }

    // 2) Enumerations
    if !schema.enum_.is_empty() && !schema.enum_.contains(value) {
        let supported: Vec<String> = schema.enum_.iter().map(|v| v.to_string()).collect();
        push(
            out,
            path,
            format!("unsupported value {}: supported values: {}", value, supported.join(", ")),
        );
    }

    // 3) Scalars
    match value {
        Json::Number(n) => check_number(schema, n, path, out),
        Json::String(s) => check_string(schema, s, path, out),
        Json::Array(items) => {
            let len = items.len() as u64;
            if let Some(max) = schema.max_items {
                if len > max {
                    push(out, path, format!("must have at most {} items", max));
                }
            }
            if let Some(min) = schema.min_items {
                if len < min {
                    push(out, path, format!("must have at least {} items", min));
                }
            }
            if let Some(ref items_schema) = schema.items {
                for (i, item) in items.iter().enumerate() {
                    check(items_schema, item, &format!("{}[{}]", path, i), out);
                }
            }
        }
        Json::Object(map) => {
            let len = map.len() as u64;
            if let Some(max) = schema.max_properties {
                if len > max {
                    push(out, path, format!("must have at most {} properties", max));
                }
            }
            if let Some(min) = schema.min_properties {
                if len < min {
                    push(out, path, format!("must have at least {} properties", min));
                }
            }
            for name in &schema.required {
                if !map.contains_key(name) {
                    push(out, &child_path(path, name), "Required value".to_string());
                }
            }
            for (key, child) in map {
                let child_at = child_path(path, key);
                if let Some(prop) = schema.properties.get(key) {
                    check(prop, child, &child_at, out);
                } else if let Some(ref values) = schema.additional_properties {
                    check(values, child, &child_at, out);
                } else if schema.preserve_unknown_fields != Some(true) {
                    push(out, &child_at, "unknown field".to_string());
                }
            }
        }
        _ => {}
    }

    // 4) CEL rules
    if schema.validations.is_empty() {
        return;
    }
    let self_value = Value::from(value);
    for rule in &schema.validations {
        match evaluate_rule(&rule.rule, &self_value) {
            Ok(true) => {}
            Ok(false) => push(
                out,
                path,
                rule.message
                    .clone()
                    .unwrap_or_else(|| format!("failed rule: {}", rule.rule)),
            ),
            Err(e) => push(out, path, format!("rule {:?} could not be evaluated: {}", rule.rule, e)),
        }
    }
}

fn check_number(schema: &JsonSchemaProps, n: &serde_json::Number, path: &str, out: &mut Vec<Violation>) {
    let v = as_f64(n);
    if let Some(ref min) = schema.minimum {
        if v < as_f64(min) {
            push(out, path, format!("should be greater than or equal to {}", min));
        }
    }
    if let Some(ref max) = schema.maximum {
        if v > as_f64(max) {
            push(out, path, format!("should be less than or equal to {}", max));
        }
    }
    if schema.format.as_deref() == Some("int32") {
        let in_range = n.as_i64().map_or(false, |i| i32::try_from(i).is_ok());
        if !in_range {
            push(out, path, format!("{} does not fit in int32", n));
        }
    }
}

fn check_string(schema: &JsonSchemaProps, s: &str, path: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count() as u64;
    if let Some(max) = schema.max_length {
        if len > max {
            push(out, path, format!("may not be longer than {}", max));
        }
    }
    if let Some(min) = schema.min_length {
        if len < min {
            push(out, path, format!("should be at least {} chars long", min));
        }
    }
    if let Some(ref pattern) = schema.pattern {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(s) => {}
            Ok(_) => push(out, path, format!("should match '{}'", pattern)),
            Err(e) => push(out, path, format!("invalid pattern '{}': {}", pattern, e)),
        }
    }
}
