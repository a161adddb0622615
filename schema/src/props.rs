use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// One entry of `x-kubernetes-validations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelRule {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    pub rule:    String,
}

impl CelRule {
    pub fn new(rule: impl Into<String>, message: Option<String>) -> Self {
        CelRule { message, rule: rule.into() }
    }

    /// Names a rule can be referred to by: its message, and its rule text.
    pub fn matches_identifier(&self, id: &str) -> bool {
        self.rule == id || self.message.as_deref() == Some(id)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The subset of the Kubernetes `JSONSchemaProps` structure that the compiler
/// emits. Fields are declared in key order so the serialized form is sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSchemaProps {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub additional_properties: Option<Box<JsonSchemaProps>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty", default)]
    pub enum_: Vec<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub items: Option<Box<JsonSchemaProps>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_items: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_length: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_properties: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub maximum: Option<Number>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_items: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_length: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_properties: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub minimum: Option<Number>,

    #[serde(skip_serializing_if = "is_false", default)]
    pub nullable: bool,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pattern: Option<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub properties: BTreeMap<String, JsonSchemaProps>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required: Vec<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub type_: Option<String>,

    #[serde(rename = "x-kubernetes-int-or-string", skip_serializing_if = "is_false", default)]
    pub int_or_string: bool,

    #[serde(
        rename = "x-kubernetes-preserve-unknown-fields",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub preserve_unknown_fields: Option<bool>,

    #[serde(rename = "x-kubernetes-validations", skip_serializing_if = "Vec::is_empty", default)]
    pub validations: Vec<CelRule>,
}

impl JsonSchemaProps {
    pub fn typed(type_: &str) -> Self {
        JsonSchemaProps {
            type_: Some(type_.to_string()),
            ..Default::default()
        }
    }

    pub fn object() -> Self {
        Self::typed("object")
    }

    pub fn array(items: JsonSchemaProps) -> Self {
        JsonSchemaProps {
            items: Some(Box::new(items)),
            ..Self::typed("array")
        }
    }

    pub fn map(values: JsonSchemaProps) -> Self {
        JsonSchemaProps {
            additional_properties: Some(Box::new(values)),
            ..Self::typed("object")
        }
    }

    /// An object whose contents are not validated or pruned.
    pub fn preserved_object() -> Self {
        JsonSchemaProps {
            preserve_unknown_fields: Some(true),
            ..Self::typed("object")
        }
    }

    pub fn is_type(&self, type_: &str) -> bool {
        self.type_.as_deref() == Some(type_)
    }

    /// Identifiers of this node's own CEL rules (messages first, then rule text).
    pub fn rule_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .validations
            .iter()
            .filter_map(|r| r.message.clone())
            .collect();
        ids.extend(self.validations.iter().map(|r| r.rule.clone()));
        ids
    }

    /// Drops every CEL rule matching one of `ids`; returns how many were removed.
    pub fn remove_rules(&mut self, ids: &[String]) -> usize {
        let before = self.validations.len();
        self.validations
            .retain(|rule| !ids.iter().any(|id| rule.matches_identifier(id)));
        before - self.validations.len()
    }

    /// Adds a rule unless an identical one is already present.
    pub fn push_rule(&mut self, rule: CelRule) {
        if !self.validations.contains(&rule) {
            self.validations.push(rule);
        }
    }

    /// Tightens the lower bound: keeps whichever of the current and new minimum is larger.
    pub fn tighten_minimum(&mut self, value: Number) {
        self.minimum = Some(match self.minimum.take() {
            Some(current) if as_f64(&current) >= as_f64(&value) => current,
            _ => value,
        });
    }

    /// Tightens the upper bound: keeps whichever of the current and new maximum is smaller.
    pub fn tighten_maximum(&mut self, value: Number) {
        self.maximum = Some(match self.maximum.take() {
            Some(current) if as_f64(&current) <= as_f64(&value) => current,
            _ => value,
        });
    }
}

pub(crate) fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

/// Lowers `slot` to `value` unless it already holds something smaller.
pub fn tighten_max(slot: &mut Option<u64>, value: u64) {
    *slot = Some(slot.map_or(value, |current| current.min(value)));
}

/// Raises `slot` to `value` unless it already holds something larger.
pub fn tighten_min(slot: &mut Option<u64>, value: u64) {
    *slot = Some(slot.map_or(value, |current| current.max(value)));
}
