use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Number};
use tracing::{debug, trace};

use protocrd_schema::{tighten_max, tighten_min, CelRule, JsonSchemaProps};

use crate::{
    marker::{interpret, is_marker, ElementType, RuleKind, RuleTarget, Scope, ScopeContext},
    types::{Field, FieldKind, Message, ProtoFile, TypeRef},
    verifier::{verify_schema, SymbolTable},
    tokenizer::tokenize_schema,
    parser::parse_schema,
    utils::quote,
    error::CrdError,
};

/// Rule attached to every `google.protobuf.Duration` value.
pub const DURATION_RULE:    &str = "duration(self) >= duration('1ms')";
pub const DURATION_MESSAGE: &str = "must be a valid duration greater than 1ms";

/// Compiled OpenAPI schemas, keyed by fully-qualified message name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaSet {
    pub schemas: BTreeMap<String, JsonSchemaProps>,
}

impl SchemaSet {
    pub fn get(&self, full_name: &str) -> Option<&JsonSchemaProps> {
        self.schemas.get(full_name.trim_start_matches('.'))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// All schemas as one YAML mapping, in name order.
    pub fn to_yaml(&self) -> Result<String, CrdError> {
        Ok(serde_yaml::to_string(&self.schemas)?)
    }
}

/// Compile annotated proto source into `(ProtoFile, SchemaSet)`.
/// Returns `Err(CrdError)` if tokenization/parsing/verification or any marker fails.
pub fn compile_schema(text: &str) -> Result<(ProtoFile, SchemaSet), CrdError> {
    let tokens = tokenize_schema(text)?;
    let file = parse_schema(&tokens)?;
    verify_schema(&file)?;
    check_detached_markers(&file)?;
    let schemas = build_schemas(&file)?;
    debug!(
        package = file.package.as_deref().unwrap_or(""),
        messages = schemas.len(),
        "compiled proto schema"
    );
    Ok((file, schemas))
}

/// Markers must sit in the comment block directly above a message or field.
fn check_detached_markers(file: &ProtoFile) -> Result<(), CrdError> {
    for comments in &file.detached {
        if let Some(line) = comments.marker_lines().find(|l| is_marker(l)) {
            return Err(CrdError::UnresolvedMarker {
                path:   format!("line {}", comments.line),
                marker: line.to_string(),
                msg:    "marker is not attached to a message or field".to_string(),
            });
        }
    }
    Ok(())
}

/// Builds the schema of every message in a verified file.
pub fn build_schemas(file: &ProtoFile) -> Result<SchemaSet, CrdError> {
    let mut builder = SchemaBuilder {
        symbols: SymbolTable::build(file)?,
        cache:   BTreeMap::new(),
    };
    for msg in file.all_messages() {
        builder.message_schema(&msg.full_name)?;
    }
    Ok(SchemaSet { schemas: builder.cache })
}

struct SchemaBuilder<'a> {
    symbols: SymbolTable<'a>,
    cache:   BTreeMap<String, JsonSchemaProps>,
}

impl<'a> SchemaBuilder<'a> {
    fn message_schema(&mut self, full_name: &str) -> Result<JsonSchemaProps, CrdError> {
        if let Some(done) = self.cache.get(full_name) {
            return Ok(done.clone());
        }
        let msg = self.symbols.message(full_name).ok_or_else(|| {
            CrdError::VerifierError(format!("The type {} is not defined", quote(full_name)))
        })?;

        let mut props = JsonSchemaProps::object();
        props.description = msg.comments.description();

        // 1) Fields
        for field in &msg.fields {
            let (schema, required) = self.field_schema(msg, field)?;
            if required && !props.required.contains(&field.json_name) {
                props.required.push(field.json_name.clone());
            }
            props.properties.insert(field.json_name.clone(), schema);
        }

        // 2) Oneof groups
        for oneof in &msg.oneofs {
            if oneof.fields.len() < 2 {
                continue;
            }
            let names: Vec<&str> = oneof
                .fields
                .iter()
                .filter_map(|name| msg.fields.iter().find(|f| &f.name == name))
                .map(|f| f.json_name.as_str())
                .collect();
            let args: Vec<String> = names.iter().map(|n| format!("self.{}", n)).collect();
            let source = format!("oneof({})", args.join(", "));
            let path = format!("{}.{}", msg.full_name, oneof.name);
            let rule = protocrd_cel::expand(&source).map_err(|e| CrdError::from_cel(&path, &source, e))?;
            props.push_rule(CelRule::new(
                rule,
                Some(format!("At most one of [{}] should be set", names.join(", "))),
            ));
        }

        // 3) Message markers
        for line in msg.comments.marker_lines().filter(|l| is_marker(l)) {
            let ctx = ScopeContext {
                path:    msg.full_name.clone(),
                scope:   Scope::Message,
                element: ElementType::Message {
                    name:     msg.full_name.clone(),
                    rule_ids: props.rule_identifiers(),
                },
            };
            let rule = interpret(line, &ctx)?;
            trace!(path = %ctx.path, marker = line, "applied message marker");
            apply_rule(&mut props, rule.kind);
        }

        self.cache.insert(full_name.to_string(), props.clone());
        Ok(props)
    }

    fn field_schema(&mut self, msg: &Message, field: &Field) -> Result<(JsonSchemaProps, bool), CrdError> {
        let path = format!("{}.{}", msg.full_name, field.name);
        let type_ref = self.symbols.resolve(&msg.full_name, &field.type_).ok_or_else(|| {
            CrdError::VerifierError(format!(
                "The type {} is not defined for field {}",
                quote(&field.type_),
                quote(&path)
            ))
        })?;

        let element = self.type_schema(&type_ref)?;
        let element_type = element_type(&type_ref, &element);
        let (scope, mut schema) = match field.kind {
            FieldKind::Map { .. } => (Scope::Map, JsonSchemaProps::map(element)),
            FieldKind::Repeated => (Scope::List, JsonSchemaProps::array(element)),
            FieldKind::Singular | FieldKind::Optional => (Scope::Scalar, element),
        };
        if let Some(description) = field.comments.description() {
            schema.description = Some(description);
        }

        let ctx = ScopeContext {
            path,
            scope,
            element: element_type,
        };
        let mut required = field.required;
        for line in field.comments.marker_lines().filter(|l| is_marker(l)) {
            let rule = interpret(line, &ctx)?;
            trace!(path = %ctx.path, marker = line, "applied field marker");
            if rule.kind == RuleKind::Required {
                required = true;
                continue;
            }
            let node = match rule.target {
                RuleTarget::Field | RuleTarget::Message => Some(&mut schema),
                RuleTarget::MapValue => schema.additional_properties.as_deref_mut(),
                RuleTarget::ListItem => schema.items.as_deref_mut(),
            };
            match node {
                Some(node) => apply_rule(node, rule.kind),
                None => {
                    return Err(CrdError::ScopeMismatch {
                        path:   ctx.path.clone(),
                        marker: line.to_string(),
                        msg:    "field has no value schema to apply the marker to".to_string(),
                    })
                }
            }
        }
        Ok((schema, required))
    }

    fn type_schema(&mut self, type_ref: &TypeRef) -> Result<JsonSchemaProps, CrdError> {
        match type_ref {
            TypeRef::Scalar(name) => Ok(scalar_schema(name)),
            TypeRef::WellKnown(name) => Ok(well_known_schema(name)),
            TypeRef::Message(full) => self.message_schema(full),
            TypeRef::Enum(full) => {
                let en = self.symbols.enum_(full).ok_or_else(|| {
                    CrdError::VerifierError(format!("The type {} is not defined", quote(full)))
                })?;
                let mut schema = JsonSchemaProps::typed("string");
                schema.enum_ = en.values.iter().map(|v| json!(v.name)).collect();
                Ok(schema)
            }
        }
    }
}

fn integer(format: Option<&str>) -> JsonSchemaProps {
    JsonSchemaProps {
        format: format.map(str::to_string),
        ..JsonSchemaProps::typed("integer")
    }
}

/// Automatic schema for a protobuf scalar type.
pub fn scalar_schema(name: &str) -> JsonSchemaProps {
    match name {
        "string" => JsonSchemaProps::typed("string"),
        "bytes" => JsonSchemaProps {
            format: Some("byte".into()),
            ..JsonSchemaProps::typed("string")
        },
        "bool" => JsonSchemaProps::typed("boolean"),
        "double" | "float" => JsonSchemaProps {
            format: Some(name.to_string()),
            ..JsonSchemaProps::typed("number")
        },
        "int32" | "sint32" | "sfixed32" => integer(Some("int32")),
        "int64" | "sint64" | "sfixed64" => integer(Some("int64")),
        "uint32" | "fixed32" => JsonSchemaProps {
            minimum: Some(Number::from(0)),
            maximum: Some(Number::from(u32::MAX)),
            ..integer(None)
        },
        "uint64" | "fixed64" => JsonSchemaProps {
            minimum: Some(Number::from(0)),
            ..integer(None)
        },
        _ => JsonSchemaProps::default(),
    }
}

/// Automatic schema for a `google.protobuf` well-known type.
pub fn well_known_schema(name: &str) -> JsonSchemaProps {
    let nullable = |scalar: &str| JsonSchemaProps {
        nullable: true,
        ..scalar_schema(scalar)
    };
    let any_value = || JsonSchemaProps {
        preserve_unknown_fields: Some(true),
        ..Default::default()
    };
    match name {
        "Duration" => {
            let mut schema = JsonSchemaProps::typed("string");
            schema.push_rule(CelRule::new(DURATION_RULE, Some(DURATION_MESSAGE.to_string())));
            schema
        }
        "Timestamp" => JsonSchemaProps {
            format: Some("date-time".into()),
            ..JsonSchemaProps::typed("string")
        },
        "Struct" | "Any" => JsonSchemaProps::preserved_object(),
        "Value" => any_value(),
        "ListValue" => JsonSchemaProps::array(any_value()),
        "Empty" => JsonSchemaProps::object(),
        "FieldMask" => JsonSchemaProps::typed("string"),
        "DoubleValue" => nullable("double"),
        "FloatValue" => nullable("float"),
        "Int64Value" => nullable("int64"),
        "UInt64Value" => nullable("uint64"),
        "Int32Value" => nullable("int32"),
        "UInt32Value" => nullable("uint32"),
        "BoolValue" => nullable("bool"),
        "StringValue" => nullable("string"),
        "BytesValue" => nullable("bytes"),
        _ => any_value(),
    }
}

fn element_type(type_ref: &TypeRef, schema: &JsonSchemaProps) -> ElementType {
    match type_ref {
        TypeRef::Scalar(name) => match name.as_str() {
            "string" => ElementType::String,
            "bytes" => ElementType::Bytes,
            "bool" => ElementType::Bool,
            "double" | "float" => ElementType::Number,
            _ => ElementType::Integer,
        },
        TypeRef::Enum(_) => ElementType::Enum,
        TypeRef::Message(full) => ElementType::Message {
            name:     full.clone(),
            rule_ids: schema.rule_identifiers(),
        },
        TypeRef::WellKnown(name) => match name.as_str() {
            "Duration" => ElementType::Duration,
            "Timestamp" => ElementType::Timestamp,
            "Struct" | "Any" | "Value" | "ListValue" => ElementType::Preserved,
            "Empty" => ElementType::Message {
                name:     type_ref.name(),
                rule_ids: Vec::new(),
            },
            "FieldMask" | "StringValue" => ElementType::String,
            "BytesValue" => ElementType::Bytes,
            "BoolValue" => ElementType::Bool,
            "DoubleValue" | "FloatValue" => ElementType::Number,
            _ => ElementType::Integer,
        },
    }
}

/// Applies a resolved rule to a schema node. Bounds only ever tighten.
fn apply_rule(node: &mut JsonSchemaProps, kind: RuleKind) {
    match kind {
        RuleKind::MaxLength(n) => tighten_max(&mut node.max_length, n),
        RuleKind::MinLength(n) => tighten_min(&mut node.min_length, n),
        RuleKind::MaxItems(n) => tighten_max(&mut node.max_items, n),
        RuleKind::MinItems(n) => tighten_min(&mut node.min_items, n),
        RuleKind::MaxProperties(n) => tighten_max(&mut node.max_properties, n),
        RuleKind::MinProperties(n) => tighten_min(&mut node.min_properties, n),
        RuleKind::Minimum(n) => node.tighten_minimum(n),
        RuleKind::Maximum(n) => node.tighten_maximum(n),
        RuleKind::Pattern(p) => node.pattern = Some(p),
        RuleKind::Cel(rule) => node.push_rule(rule),
        RuleKind::IntOrString => {
            node.int_or_string = true;
            node.type_ = None;
            node.format = None;
        }
        RuleKind::IgnoreSubValidation(ids) => {
            node.remove_rules(&ids);
        }
        RuleKind::DurationValidationNone => {
            node.remove_rules(&[DURATION_RULE.to_string()]);
        }
        RuleKind::PreserveUnknownFields => node.preserve_unknown_fields = Some(true),
        RuleKind::Required => {}
    }
}
