//! Static comparison of two compiled schema versions.
//!
//! Field identity is the field number: a field whose number disappears was
//! removed (or renumbered, if its name survives), a field whose number
//! survives must keep its name, cardinality and type. Validation may only be
//! loosened between releases, so the compiled schemas of the previous
//! release's messages are compared node by node.

use std::fmt;

use protocrd_schema::JsonSchemaProps;
use serde::Serialize;
use tracing::debug;

use crate::{
    compiler::{compile_schema, SchemaSet},
    types::{Field, Message, ProtoFile},
    verifier::SymbolTable,
    error::CrdError,
};

/// A compiled schema version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub file:    ProtoFile,
    pub schemas: SchemaSet,
}

impl Snapshot {
    pub fn compile(text: &str) -> Result<Snapshot, CrdError> {
        let (file, schemas) = compile_schema(text)?;
        Ok(Snapshot { file, schemas })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum BreakageKind {
    FieldRemoved,
    FieldNumberChanged { from: i64, to: i64 },
    FieldRenamed { from: String, to: String },
    CardinalityChanged { from: String, to: String },
    FieldTypeChanged { from: String, to: String },
    MessageRemoved,
    EnumRemoved,
    EnumValueRemoved,
    EnumValueRenumbered { from: i64, to: i64 },
    ValidationTightened(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Breakage {
    pub path: String,
    pub kind: BreakageKind,
}

impl fmt::Display for BreakageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakageKind::FieldRemoved => write!(f, "field removed"),
            BreakageKind::FieldNumberChanged { from, to } => {
                write!(f, "field number changed from {} to {}", from, to)
            }
            BreakageKind::FieldRenamed { from, to } => write!(f, "field renamed from {} to {}", from, to),
            BreakageKind::CardinalityChanged { from, to } => {
                write!(f, "cardinality changed from {} to {}", from, to)
            }
            BreakageKind::FieldTypeChanged { from, to } => write!(f, "type changed from {} to {}", from, to),
            BreakageKind::MessageRemoved => write!(f, "message removed"),
            BreakageKind::EnumRemoved => write!(f, "enum removed"),
            BreakageKind::EnumValueRemoved => write!(f, "enum value removed"),
            BreakageKind::EnumValueRenumbered { from, to } => {
                write!(f, "enum value renumbered from {} to {}", from, to)
            }
            BreakageKind::ValidationTightened(what) => write!(f, "validation tightened: {}", what),
        }
    }
}

impl fmt::Display for Breakage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind)
    }
}

/// Every breaking change from `previous` to `candidate`, sorted by path.
pub fn check_compatibility(previous: &Snapshot, candidate: &Snapshot) -> Result<Vec<Breakage>, CrdError> {
    let old_symbols = SymbolTable::build(&previous.file)?;
    let new_symbols = SymbolTable::build(&candidate.file)?;
    let mut out = Vec::new();

    // 1) Messages and their fields
    for old in previous.file.all_messages() {
        match new_symbols.message(&old.full_name) {
            None => out.push(Breakage {
                path: old.full_name.clone(),
                kind: BreakageKind::MessageRemoved,
            }),
            Some(new) => compare_fields(old, new, &old_symbols, &new_symbols, &mut out),
        }
    }

    // 2) Enums
    for old in previous.file.all_enums() {
        let Some(new) = new_symbols.enum_(&old.full_name) else {
            out.push(Breakage {
                path: old.full_name.clone(),
                kind: BreakageKind::EnumRemoved,
            });
            continue;
        };
        for value in &old.values {
            let path = format!("{}.{}", old.full_name, value.name);
            match new.values.iter().find(|v| v.name == value.name) {
                None => out.push(Breakage { path, kind: BreakageKind::EnumValueRemoved }),
                Some(v) if v.number != value.number => out.push(Breakage {
                    path,
                    kind: BreakageKind::EnumValueRenumbered { from: value.number, to: v.number },
                }),
                Some(_) => {}
            }
        }
    }

    // 3) Validation strictness
    for (name, old) in &previous.schemas.schemas {
        if let Some(new) = candidate.schemas.get(name) {
            compare_schema(name, old, new, &mut out);
        }
    }

    out.sort();
    out.dedup();
    debug!(breakages = out.len(), "compatibility check finished");
    Ok(out)
}

fn type_name(symbols: &SymbolTable, msg: &Message, field: &Field) -> String {
    symbols
        .resolve(&msg.full_name, &field.type_)
        .map(|t| t.name())
        .unwrap_or_else(|| field.type_.clone())
}

fn compare_fields(
    old: &Message,
    new: &Message,
    old_symbols: &SymbolTable,
    new_symbols: &SymbolTable,
    out: &mut Vec<Breakage>,
) {
    for field in &old.fields {
        let path = format!("{}.{}", old.full_name, field.name);
        let Some(next) = new.fields.iter().find(|f| f.number == field.number) else {
            let kind = match new.fields.iter().find(|f| f.name == field.name) {
                Some(renumbered) => BreakageKind::FieldNumberChanged {
                    from: field.number,
                    to:   renumbered.number,
                },
                None => BreakageKind::FieldRemoved,
            };
            out.push(Breakage { path, kind });
            continue;
        };

        if next.name != field.name {
            out.push(Breakage {
                path: path.clone(),
                kind: BreakageKind::FieldRenamed { from: field.name.clone(), to: next.name.clone() },
            });
        }
        if next.kind != field.kind {
            out.push(Breakage {
                path: path.clone(),
                kind: BreakageKind::CardinalityChanged {
                    from: field.kind.label().to_string(),
                    to:   next.kind.label().to_string(),
                },
            });
        }
        let (from, to) = (type_name(old_symbols, old, field), type_name(new_symbols, new, next));
        if from != to {
            out.push(Breakage { path, kind: BreakageKind::FieldTypeChanged { from, to } });
        }
    }
}

fn lowered(old: Option<u64>, new: Option<u64>) -> bool {
    matches!((old, new), (_, Some(n)) if old.map_or(true, |o| n < o))
}

fn raised(old: Option<u64>, new: Option<u64>) -> bool {
    matches!((old, new), (_, Some(n)) if old.map_or(true, |o| n > o))
}

fn compare_schema(path: &str, old: &JsonSchemaProps, new: &JsonSchemaProps, out: &mut Vec<Breakage>) {
    let mut tightened = |what: String| {
        out.push(Breakage {
            path: path.to_string(),
            kind: BreakageKind::ValidationTightened(what),
        })
    };

    if old.type_ != new.type_ && new.type_.is_some() {
        tightened(format!(
            "type changed from {} to {}",
            old.type_.as_deref().unwrap_or("any"),
            new.type_.as_deref().unwrap_or("any")
        ));
    }
    if old.int_or_string && !new.int_or_string {
        tightened("int-or-string removed".to_string());
    }
    if old.nullable && !new.nullable {
        tightened("null no longer accepted".to_string());
    }
    if old.preserve_unknown_fields == Some(true) && new.preserve_unknown_fields != Some(true) {
        tightened("unknown fields no longer preserved".to_string());
    }

    let bounds = [
        ("maxLength", lowered(old.max_length, new.max_length)),
        ("maxItems", lowered(old.max_items, new.max_items)),
        ("maxProperties", lowered(old.max_properties, new.max_properties)),
        ("minLength", raised(old.min_length, new.min_length)),
        ("minItems", raised(old.min_items, new.min_items)),
        ("minProperties", raised(old.min_properties, new.min_properties)),
    ];
    for (name, changed) in bounds {
        if changed {
            tightened(format!("{} tightened", name));
        }
    }

    let as_f64 = |n: &serde_json::Number| n.as_f64().unwrap_or(f64::NAN);
    if let Some(max) = &new.maximum {
        if old.maximum.as_ref().map_or(true, |o| as_f64(max) < as_f64(o)) {
            tightened("maximum tightened".to_string());
        }
    }
    if let Some(min) = &new.minimum {
        if old.minimum.as_ref().map_or(true, |o| as_f64(min) > as_f64(o)) {
            tightened("minimum tightened".to_string());
        }
    }

    match (&old.pattern, &new.pattern) {
        (None, Some(p)) => tightened(format!("pattern {:?} added", p)),
        (Some(o), Some(p)) if o != p => tightened(format!("pattern changed from {:?} to {:?}", o, p)),
        _ => {}
    }

    if !new.enum_.is_empty() && (old.enum_.is_empty() || old.enum_.iter().any(|v| !new.enum_.contains(v))) {
        tightened("allowed values restricted".to_string());
    }
    for name in new.required.iter().filter(|n| !old.required.contains(n)) {
        tightened(format!("field {} is now required", name));
    }
    for rule in new.validations.iter().filter(|r| !old.validations.iter().any(|o| o.rule == r.rule)) {
        tightened(format!("rule {:?} added", rule.rule));
    }

    for (key, old_prop) in &old.properties {
        if let Some(new_prop) = new.properties.get(key) {
            compare_schema(&format!("{}.{}", path, key), old_prop, new_prop, out);
        }
    }
    if let (Some(o), Some(n)) = (&old.items, &new.items) {
        compare_schema(&format!("{}[*]", path), o, n, out);
    }
    if let (Some(o), Some(n)) = (&old.additional_properties, &new.additional_properties) {
        compare_schema(&format!("{}.*", path), o, n, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakages(previous: &str, candidate: &str) -> Vec<Breakage> {
        let previous = Snapshot::compile(previous).unwrap();
        let candidate = Snapshot::compile(candidate).unwrap();
        check_compatibility(&previous, &candidate).unwrap()
    }

    #[test]
    fn test_identical_is_compatible() {
        let text = "message A { string name = 1; repeated int32 ports = 2; }";
        assert!(breakages(text, text).is_empty());
    }

    #[test]
    fn test_loosening_is_compatible() {
        let previous = "message A {\n  // +kubebuilder:validation:MaxLength=5\n  string name = 1;\n}\n";
        let candidate = "message A {\n  // +kubebuilder:validation:MaxLength=10\n  string name = 1;\n  string extra = 2;\n}\n";
        assert!(breakages(previous, candidate).is_empty());
    }

    #[test]
    fn test_field_changes() {
        let found = breakages(
            "message A { string a = 1; string b = 2; string c = 3; int32 d = 4; }",
            "message A { string renamed = 1; string b = 5; int64 d = 4; }",
        );
        assert_eq!(
            found,
            vec![
                Breakage {
                    path: "A.a".into(),
                    kind: BreakageKind::FieldRenamed { from: "a".into(), to: "renamed".into() },
                },
                Breakage { path: "A.b".into(), kind: BreakageKind::FieldNumberChanged { from: 2, to: 5 } },
                Breakage { path: "A.c".into(), kind: BreakageKind::FieldRemoved },
                Breakage {
                    path: "A.d".into(),
                    kind: BreakageKind::FieldTypeChanged { from: "int32".into(), to: "int64".into() },
                },
            ]
        );
    }

    #[test]
    fn test_cardinality_change() {
        let found = breakages("message A { string field = 1; }", "message A { repeated string field = 1; }");
        assert!(found.contains(&Breakage {
            path: "A.field".into(),
            kind: BreakageKind::CardinalityChanged { from: "singular".into(), to: "repeated".into() },
        }));
    }

    #[test]
    fn test_enum_changes() {
        let found = breakages(
            "enum Mode { UNSET = 0; STRICT = 1; LAX = 2; } enum Gone { G = 0; }",
            "enum Mode { UNSET = 0; STRICT = 3; }",
        );
        assert_eq!(
            found,
            vec![
                Breakage { path: "Gone".into(), kind: BreakageKind::EnumRemoved },
                Breakage { path: "Mode.LAX".into(), kind: BreakageKind::EnumValueRemoved },
                Breakage {
                    path: "Mode.STRICT".into(),
                    kind: BreakageKind::EnumValueRenumbered { from: 1, to: 3 },
                },
            ]
        );
    }

    #[test]
    fn test_validation_tightened() {
        let previous = "message A {\n  string name = 1;\n  // +protoc-gen-crd:validation:XIntOrString\n  uint32 port = 2;\n}\n";
        let candidate = r#"
// +kubebuilder:validation:XValidation:rule="size(self.name) > 0"
message A {
  // +kubebuilder:validation:MaxLength=10
  // +kubebuilder:validation:Pattern=`^[a-z]+$`
  // +kubebuilder:validation:Required
  string name = 1;
  uint32 port = 2;
}
"#;
        let found: Vec<String> = breakages(previous, candidate).iter().map(|b| b.to_string()).collect();
        assert!(found.contains(&"A: validation tightened: field name is now required".to_string()), "{:?}", found);
        assert!(found.contains(&"A: validation tightened: rule \"size(self.name) > 0\" added".to_string()), "{:?}", found);
        assert!(found.contains(&"A.name: validation tightened: maxLength tightened".to_string()), "{:?}", found);
        assert!(found.contains(&"A.name: validation tightened: pattern \"^[a-z]+$\" added".to_string()), "{:?}", found);
        assert!(found.contains(&"A.port: validation tightened: int-or-string removed".to_string()), "{:?}", found);
    }

    #[test]
    fn test_message_removed() {
        let found = breakages("message A {} message B {}", "message A {}");
        assert_eq!(found, vec![Breakage { path: "B".into(), kind: BreakageKind::MessageRemoved }]);
    }
}
