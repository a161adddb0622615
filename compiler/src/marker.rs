//! Comment markers and their interpretation.
//!
//! A marker is a comment line beginning with one of the vocabulary prefixes
//! below. [`interpret`] turns one marker into a [`ValidationRule`] bound to a
//! node of the schema tree, after checking it against the annotated element.
//!
//! | prefix | examples |
//! |---|---|
//! | `+protoc-gen-crd:` | `map-value-validation:MaxLength=63`, `validation:XIntOrString` |
//! | `+kubebuilder:` | `validation:MaxItems=16`, `validation:XValidation:rule="..."` |
//!
//! Lines with any other `+` prefix are left for other tools.

use regex::Regex;
use serde_json::Number;
use thiserror::Error;

use protocrd_schema::CelRule;

use crate::error::CrdError;

pub const CRD_PREFIX:         &str = "+protoc-gen-crd:";
pub const KUBEBUILDER_PREFIX: &str = "+kubebuilder:";

/// Whether `line` is in the marker vocabulary (as opposed to a foreign `+` line).
pub fn is_marker(line: &str) -> bool {
    let line = line.trim();
    line.starts_with(CRD_PREFIX) || line.starts_with(KUBEBUILDER_PREFIX)
}

/// Why a marker line could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarkerError {
    /// The marker name is not in the vocabulary.
    #[error("{0}")]
    Unknown(String),

    /// The marker is known but its argument is malformed.
    #[error("{0}")]
    Argument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    MapValue(Box<Marker>),
    ListValue(Box<Marker>),
    DurationValidationNone,
    IntOrString,
    IgnoreSubValidation(Vec<String>),
    PreserveUnknownFields,
    MaxLength(u64),
    MinLength(u64),
    MaxItems(u64),
    MinItems(u64),
    MaxProperties(u64),
    MinProperties(u64),
    Minimum(Number),
    Maximum(Number),
    Pattern(String),
    XValidation { rule: String, message: Option<String> },
    Required,
}

impl Marker {
    /// Parses a full marker line.
    pub fn parse(text: &str) -> Result<Marker, MarkerError> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix(CRD_PREFIX) {
            if let Some(inner) = rest.strip_prefix("map-value-validation:") {
                return Ok(Marker::MapValue(Box::new(Marker::parse_inner(inner)?)));
            }
            if let Some(inner) = rest.strip_prefix("list-value-validation:") {
                return Ok(Marker::ListValue(Box::new(Marker::parse_inner(inner)?)));
            }
            if let Some(ids) = rest.strip_prefix("validation:IgnoreSubValidation:") {
                return parse_identifiers(ids).map(Marker::IgnoreSubValidation).map_err(MarkerError::Argument);
            }
            return match rest {
                "duration-validation:none" => Ok(Marker::DurationValidationNone),
                "validation:XIntOrString" => Ok(Marker::IntOrString),
                "validation:PreserveUnknownFields" => Ok(Marker::PreserveUnknownFields),
                _ => Err(MarkerError::Unknown(format!("unknown marker {:?}", rest))),
            };
        }
        if let Some(rest) = text.strip_prefix(KUBEBUILDER_PREFIX) {
            if rest == "pruning:PreserveUnknownFields" {
                return Ok(Marker::PreserveUnknownFields);
            }
            if let Some(directive) = rest.strip_prefix("validation:") {
                return parse_kubebuilder(directive);
            }
            return Err(MarkerError::Unknown(format!("unknown marker {:?}", rest)));
        }
        Err(MarkerError::Unknown("not a protoc-gen-crd or kubebuilder marker".to_string()))
    }

    /// Parses the marker wrapped by `map-value-validation`/`list-value-validation`,
    /// which is usually written without a prefix. A candidate that names a known
    /// marker with a bad argument wins over the unknown-name errors.
    fn parse_inner(inner: &str) -> Result<Marker, MarkerError> {
        if inner.starts_with('+') {
            return Marker::parse(inner);
        }
        let candidates = [
            format!("{}validation:{}", KUBEBUILDER_PREFIX, inner),
            format!("{}{}", CRD_PREFIX, inner),
            format!("{}validation:{}", CRD_PREFIX, inner),
        ];
        let mut first_err = None;
        for candidate in &candidates {
            match Marker::parse(candidate) {
                Ok(marker) => return Ok(marker),
                Err(e @ MarkerError::Argument(_)) => return Err(e),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| MarkerError::Unknown(format!("unknown marker {:?}", inner))))
    }
}

fn parse_count(name: &str, value: Option<&str>) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("{} needs a value", name))?;
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("{} expects a non-negative integer, got {:?}", name, value))
}

fn parse_number(name: &str, value: Option<&str>) -> Result<Number, String> {
    let value = value.ok_or_else(|| format!("{} needs a value", name))?;
    serde_json::from_str::<Number>(value.trim())
        .map_err(|_| format!("{} expects a number, got {:?}", name, value))
}

fn parse_kubebuilder(directive: &str) -> Result<Marker, MarkerError> {
    if let Some(args) = directive.strip_prefix("XValidation:") {
        return parse_xvalidation(args).map_err(MarkerError::Argument);
    }

    let (name, value) = match directive.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (directive, None),
    };
    let marker = match name {
        "MaxLength" => parse_count(name, value).map(Marker::MaxLength),
        "MinLength" => parse_count(name, value).map(Marker::MinLength),
        "MaxItems" => parse_count(name, value).map(Marker::MaxItems),
        "MinItems" => parse_count(name, value).map(Marker::MinItems),
        "MaxProperties" => parse_count(name, value).map(Marker::MaxProperties),
        "MinProperties" => parse_count(name, value).map(Marker::MinProperties),
        "Minimum" => parse_number(name, value).map(Marker::Minimum),
        "Maximum" => parse_number(name, value).map(Marker::Maximum),
        "Pattern" => value
            .ok_or_else(|| "Pattern needs a value".to_string())
            .and_then(strip_quotes)
            .map(Marker::Pattern),
        "Required" => match value {
            None => Ok(Marker::Required),
            Some(value) => Err(format!("Required takes no value, got {:?}", value)),
        },
        _ => return Err(MarkerError::Unknown(format!("unknown kubebuilder validation {:?}", name))),
    };
    marker.map_err(MarkerError::Argument)
}

fn parse_xvalidation(args: &str) -> Result<Marker, String> {
    let mut rule = None;
    let mut message = None;
    for (key, value) in parse_arguments(args)? {
        match key.as_str() {
            "rule" => rule = Some(value),
            "message" => message = Some(value),
            other => return Err(format!("unsupported XValidation argument {:?}", other)),
        }
    }
    let rule = rule.ok_or("XValidation needs a rule argument")?;
    Ok(Marker::XValidation { rule, message })
}

/// Removes backtick or double quotes around a marker value.
fn strip_quotes(value: &str) -> Result<String, String> {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('`') {
        return inner
            .strip_suffix('`')
            .map(str::to_string)
            .ok_or_else(|| format!("unterminated backtick in {:?}", value));
    }
    if value.starts_with('"') {
        let (text, rest) = read_quoted(value)?;
        if !rest.trim().is_empty() {
            return Err(format!("unexpected text after quoted value: {:?}", rest));
        }
        return Ok(text);
    }
    Ok(value.to_string())
}

/// Reads a double-quoted string at the start of `s`, returning its unescaped
/// contents and the remaining input.
fn read_quoted(s: &str) -> Result<(String, &str), String> {
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &s[i + 1..])),
            '\\' => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(format!("unterminated string in {:?}", s))
}

/// Parses `key=value,key=value` where values may be quoted.
fn parse_arguments(args: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    let mut rest = args.trim();
    while !rest.is_empty() {
        let (key, after) = rest
            .split_once('=')
            .ok_or_else(|| format!("expected key=value in {:?}", rest))?;
        let after = after.trim_start();
        let (value, remaining) = if after.starts_with('"') {
            read_quoted(after)?
        } else if let Some(inner) = after.strip_prefix('`') {
            let end = inner.find('`').ok_or_else(|| format!("unterminated backtick in {:?}", after))?;
            (inner[..end].to_string(), &inner[end + 1..])
        } else {
            match after.find(',') {
                Some(i) => (after[..i].trim().to_string(), &after[i..]),
                None => (after.trim().to_string(), ""),
            }
        };
        out.push((key.trim().to_string(), value));
        let remaining = remaining.trim_start();
        rest = match remaining.strip_prefix(',') {
            Some(r) => r.trim_start(),
            None if remaining.is_empty() => remaining,
            None => return Err(format!("expected \",\" before {:?}", remaining)),
        };
    }
    Ok(out)
}

fn parse_identifiers(ids: &str) -> Result<Vec<String>, String> {
    let ids: Vec<String> = ids
        .split(',')
        .map(|id| id.trim().trim_matches('"').to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return Err("IgnoreSubValidation needs at least one identifier".to_string());
    }
    Ok(ids)
}

/// What kind of element a marker is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Scalar,
    Map,
    List,
    Message,
}

/// Type of the annotated value: the field itself for scalars, the value type
/// for maps, the item type for lists.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    String,
    Bytes,
    Integer,
    Number,
    Bool,
    Enum,
    Duration,
    Timestamp,
    /// A message type and the identifiers of the rules on its own schema.
    Message { name: String, rule_ids: Vec<String> },
    /// `Struct`, `Value`, `ListValue` and `Any`.
    Preserved,
}

impl ElementType {
    fn describe(&self) -> String {
        match self {
            ElementType::String => "string".into(),
            ElementType::Bytes => "bytes".into(),
            ElementType::Integer => "integer".into(),
            ElementType::Number => "number".into(),
            ElementType::Bool => "bool".into(),
            ElementType::Enum => "enum".into(),
            ElementType::Duration => "google.protobuf.Duration".into(),
            ElementType::Timestamp => "google.protobuf.Timestamp".into(),
            ElementType::Message { name, .. } => format!("message {}", name),
            ElementType::Preserved => "free-form value".into(),
        }
    }

    fn is_string(&self) -> bool {
        matches!(self, ElementType::String | ElementType::Bytes)
    }

    fn is_numeric(&self) -> bool {
        matches!(self, ElementType::Integer | ElementType::Number)
    }

    fn is_object(&self) -> bool {
        matches!(self, ElementType::Message { .. } | ElementType::Preserved)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeContext {
    /// Element path used in errors, e.g. `pkg.Message.field`.
    pub path:    String,
    pub scope:   Scope,
    pub element: ElementType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Field,
    MapValue,
    ListItem,
    Message,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    MaxLength(u64),
    MinLength(u64),
    MaxItems(u64),
    MinItems(u64),
    MaxProperties(u64),
    MinProperties(u64),
    Minimum(Number),
    Maximum(Number),
    Pattern(String),
    /// A CEL rule with macros already expanded.
    Cel(CelRule),
    IntOrString,
    Required,
    IgnoreSubValidation(Vec<String>),
    DurationValidationNone,
    PreserveUnknownFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub target: RuleTarget,
    pub kind:   RuleKind,
}

/// Resolves one marker line against the element it annotates.
pub fn interpret(marker_text: &str, ctx: &ScopeContext) -> Result<ValidationRule, CrdError> {
    let text = marker_text.trim();
    let marker = Marker::parse(text).map_err(|e| match e {
        MarkerError::Unknown(msg) => CrdError::UnresolvedMarker {
            path:   ctx.path.clone(),
            marker: text.to_string(),
            msg,
        },
        MarkerError::Argument(msg) => CrdError::InvalidRule {
            path:   ctx.path.clone(),
            marker: text.to_string(),
            msg,
        },
    })?;
    let check = Checker { ctx, text };

    if ctx.scope == Scope::Message {
        let kind = match marker {
            Marker::XValidation { rule, message } => check.cel(&rule, message)?,
            Marker::MaxProperties(n) => RuleKind::MaxProperties(n),
            Marker::MinProperties(n) => RuleKind::MinProperties(n),
            Marker::PreserveUnknownFields => RuleKind::PreserveUnknownFields,
            _ => return Err(check.scope_mismatch("marker cannot be applied to a message")),
        };
        return Ok(ValidationRule { target: RuleTarget::Message, kind });
    }

    match marker {
        Marker::MapValue(inner) => {
            if ctx.scope != Scope::Map {
                return Err(check.scope_mismatch("map-value-validation requires a map field"));
            }
            let kind = check.element(*inner)?;
            Ok(ValidationRule { target: RuleTarget::MapValue, kind })
        }
        Marker::ListValue(inner) => {
            if ctx.scope != Scope::List {
                return Err(check.scope_mismatch("list-value-validation requires a repeated field"));
            }
            let kind = check.element(*inner)?;
            Ok(ValidationRule { target: RuleTarget::ListItem, kind })
        }
        other => check.field(other),
    }
}

struct Checker<'a> {
    ctx:  &'a ScopeContext,
    text: &'a str,
}

impl<'a> Checker<'a> {
    fn scope_mismatch(&self, msg: &str) -> CrdError {
        CrdError::ScopeMismatch {
            path:   self.ctx.path.clone(),
            marker: self.text.to_string(),
            msg:    msg.to_string(),
        }
    }

    fn type_mismatch(&self, expected: &str) -> CrdError {
        CrdError::TypeMismatch {
            path:   self.ctx.path.clone(),
            marker: self.text.to_string(),
            msg:    format!("requires {}, found {}", expected, self.ctx.element.describe()),
        }
    }

    /// Target for rules that act on the element type rather than the container.
    fn element_target(&self) -> RuleTarget {
        match self.ctx.scope {
            Scope::Map => RuleTarget::MapValue,
            Scope::List => RuleTarget::ListItem,
            _ => RuleTarget::Field,
        }
    }

    fn cel(&self, rule: &str, message: Option<String>) -> Result<RuleKind, CrdError> {
        let expanded = protocrd_cel::expand(rule)
            .map_err(|e| CrdError::from_cel(&self.ctx.path, self.text, e))?;
        Ok(RuleKind::Cel(CelRule::new(expanded, message)))
    }

    fn pattern(&self, pattern: String) -> Result<RuleKind, CrdError> {
        Regex::new(&pattern).map_err(|e| CrdError::InvalidRule {
            path:   self.ctx.path.clone(),
            marker: self.text.to_string(),
            msg:    e.to_string(),
        })?;
        Ok(RuleKind::Pattern(pattern))
    }

    fn ignore_sub_validation(&self, ids: Vec<String>) -> Result<RuleKind, CrdError> {
        let rule_ids = match self.ctx.element {
            ElementType::Message { ref rule_ids, .. } => rule_ids,
            _ => return Err(self.type_mismatch("a message type")),
        };
        if let Some(missing) = ids.iter().find(|id| !rule_ids.contains(id)) {
            return Err(CrdError::UnknownSubValidation {
                path:   self.ctx.path.clone(),
                marker: self.text.to_string(),
                id:     missing.clone(),
            });
        }
        Ok(RuleKind::IgnoreSubValidation(ids))
    }

    /// Markers applied to the field itself.
    fn field(&self, marker: Marker) -> Result<ValidationRule, CrdError> {
        let element = &self.ctx.element;
        let container = self.ctx.scope != Scope::Scalar;
        let on_field = |kind: RuleKind| -> Result<ValidationRule, CrdError> {
            Ok(ValidationRule { target: RuleTarget::Field, kind })
        };

        match marker {
            Marker::XValidation { rule, message } => on_field(self.cel(&rule, message)?),
            Marker::Required => on_field(RuleKind::Required),
            Marker::MaxItems(_) | Marker::MinItems(_) if self.ctx.scope != Scope::List => {
                Err(self.scope_mismatch("item bounds require a repeated field"))
            }
            Marker::MaxItems(n) => on_field(RuleKind::MaxItems(n)),
            Marker::MinItems(n) => on_field(RuleKind::MinItems(n)),
            Marker::MaxProperties(_) | Marker::MinProperties(_) if self.ctx.scope == Scope::List => {
                Err(self.scope_mismatch("property bounds apply to maps and messages; use list-value-validation"))
            }
            Marker::MaxProperties(_) | Marker::MinProperties(_)
                if self.ctx.scope == Scope::Scalar && !element.is_object() =>
            {
                Err(self.type_mismatch("a map or message type"))
            }
            Marker::MaxProperties(n) => on_field(RuleKind::MaxProperties(n)),
            Marker::MinProperties(n) => on_field(RuleKind::MinProperties(n)),
            Marker::DurationValidationNone => {
                if *element != ElementType::Duration {
                    return Err(self.type_mismatch("google.protobuf.Duration"));
                }
                Ok(ValidationRule { target: self.element_target(), kind: RuleKind::DurationValidationNone })
            }
            Marker::IgnoreSubValidation(ids) => Ok(ValidationRule {
                target: self.element_target(),
                kind:   self.ignore_sub_validation(ids)?,
            }),
            _ if container => Err(self.scope_mismatch(match self.ctx.scope {
                Scope::Map => "marker applies to map values; use map-value-validation",
                _ => "marker applies to list items; use list-value-validation",
            })),
            other => on_field(self.scalar(other)?),
        }
    }

    /// Markers applied to a single value: a scalar field, a map value or a list item.
    fn element(&self, marker: Marker) -> Result<RuleKind, CrdError> {
        match marker {
            Marker::MapValue(_) | Marker::ListValue(_) => {
                Err(self.scope_mismatch("container validations cannot be nested"))
            }
            Marker::Required => Err(self.scope_mismatch("Required applies to fields only")),
            Marker::MaxItems(_) | Marker::MinItems(_) => {
                Err(self.scope_mismatch("item bounds require a list"))
            }
            Marker::XValidation { rule, message } => self.cel(&rule, message),
            Marker::IgnoreSubValidation(ids) => self.ignore_sub_validation(ids),
            Marker::DurationValidationNone => {
                if self.ctx.element != ElementType::Duration {
                    return Err(self.type_mismatch("google.protobuf.Duration"));
                }
                Ok(RuleKind::DurationValidationNone)
            }
            Marker::MaxProperties(_) | Marker::MinProperties(_) if !self.ctx.element.is_object() => {
                Err(self.type_mismatch("a message type"))
            }
            Marker::MaxProperties(n) => Ok(RuleKind::MaxProperties(n)),
            Marker::MinProperties(n) => Ok(RuleKind::MinProperties(n)),
            other => self.scalar(other),
        }
    }

    /// Value-level markers whose validity depends only on the element type.
    fn scalar(&self, marker: Marker) -> Result<RuleKind, CrdError> {
        let element = &self.ctx.element;
        match marker {
            Marker::MaxLength(n) if element.is_string() => Ok(RuleKind::MaxLength(n)),
            Marker::MinLength(n) if element.is_string() => Ok(RuleKind::MinLength(n)),
            Marker::Pattern(p) if element.is_string() => self.pattern(p),
            Marker::MaxLength(_) | Marker::MinLength(_) | Marker::Pattern(_) => {
                Err(self.type_mismatch("a string type"))
            }
            Marker::Minimum(n) if element.is_numeric() => Ok(RuleKind::Minimum(n)),
            Marker::Maximum(n) if element.is_numeric() => Ok(RuleKind::Maximum(n)),
            Marker::Minimum(_) | Marker::Maximum(_) => Err(self.type_mismatch("a numeric type")),
            Marker::IntOrString if element.is_numeric() || *element == ElementType::String => {
                Ok(RuleKind::IntOrString)
            }
            Marker::IntOrString => Err(self.type_mismatch("an integer, number or string type")),
            Marker::PreserveUnknownFields if element.is_object() => Ok(RuleKind::PreserveUnknownFields),
            Marker::PreserveUnknownFields => Err(self.type_mismatch("a message type")),
            _ => Err(self.scope_mismatch("marker is not valid here")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(scope: Scope, element: ElementType) -> ScopeContext {
        ScopeContext {
            path: "demo.Spec.field".into(),
            scope,
            element,
        }
    }

    fn message(rule_ids: &[&str]) -> ElementType {
        ElementType::Message {
            name:     "demo.Sub".into(),
            rule_ids: rule_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_marker_vocabulary() {
        assert_eq!(
            Marker::parse("+protoc-gen-crd:map-value-validation:MaxLength=63"),
            Ok(Marker::MapValue(Box::new(Marker::MaxLength(63))))
        );
        assert_eq!(
            Marker::parse("+protoc-gen-crd:list-value-validation:XIntOrString"),
            Ok(Marker::ListValue(Box::new(Marker::IntOrString)))
        );
        assert_eq!(
            Marker::parse("+protoc-gen-crd:validation:IgnoreSubValidation:\"a is set\",b"),
            Ok(Marker::IgnoreSubValidation(vec!["a is set".into(), "b".into()]))
        );
        assert_eq!(
            Marker::parse("+kubebuilder:validation:Pattern=`^[a-z]+$`"),
            Ok(Marker::Pattern("^[a-z]+$".into()))
        );
        assert_eq!(
            Marker::parse("+kubebuilder:validation:Minimum=-1.5"),
            Ok(Marker::Minimum(serde_json::from_str("-1.5").unwrap()))
        );
        assert_eq!(
            Marker::parse(r#"+kubebuilder:validation:XValidation:rule="self.a == \"x, y\"",message="a must be \"x, y\"""#),
            Ok(Marker::XValidation {
                rule:    "self.a == \"x, y\"".into(),
                message: Some("a must be \"x, y\"".into()),
            })
        );
        assert_eq!(Marker::parse("+kubebuilder:pruning:PreserveUnknownFields"), Ok(Marker::PreserveUnknownFields));
        assert!(matches!(Marker::parse("+kubebuilder:validation:MaxLenght=3"), Err(MarkerError::Unknown(_))));
        assert!(matches!(Marker::parse("+protoc-gen-crd:validation:Bogus"), Err(MarkerError::Unknown(_))));
        assert!(matches!(Marker::parse("+kubebuilder:validation:MaxLength=abc"), Err(MarkerError::Argument(_))));
        assert!(matches!(Marker::parse("+kubebuilder:validation:Required=true"), Err(MarkerError::Argument(_))));
        assert!(matches!(
            Marker::parse("+protoc-gen-crd:map-value-validation:MinItems=-2"),
            Err(MarkerError::Argument(msg)) if msg.contains("MinItems")
        ));
        assert!(is_marker("  +kubebuilder:validation:Required"));
        assert!(!is_marker("+genclient"));
    }

    #[test]
    fn test_container_markers_require_matching_scope() {
        let rule = interpret(
            "+protoc-gen-crd:map-value-validation:MaxLength=63",
            &ctx(Scope::Map, ElementType::String),
        )
        .unwrap();
        assert_eq!(rule, ValidationRule { target: RuleTarget::MapValue, kind: RuleKind::MaxLength(63) });

        let rule = interpret(
            "+protoc-gen-crd:list-value-validation:XValidation:rule=\"self.size() > 0\"",
            &ctx(Scope::List, ElementType::String),
        )
        .unwrap();
        assert_eq!(rule.target, RuleTarget::ListItem);

        let err = interpret(
            "+protoc-gen-crd:map-value-validation:MaxLength=63",
            &ctx(Scope::Scalar, ElementType::String),
        )
        .unwrap_err();
        assert!(matches!(err, CrdError::ScopeMismatch { .. }), "{:?}", err);

        let err = interpret(
            "+protoc-gen-crd:list-value-validation:MaxLength=63",
            &ctx(Scope::Map, ElementType::String),
        )
        .unwrap_err();
        assert!(matches!(err, CrdError::ScopeMismatch { .. }));

        let err = interpret(
            "+protoc-gen-crd:map-value-validation:Minimum=1",
            &ctx(Scope::Map, ElementType::String),
        )
        .unwrap_err();
        assert!(matches!(err, CrdError::TypeMismatch { .. }));
    }

    #[test]
    fn test_duration_validation_none() {
        let rule = interpret("+protoc-gen-crd:duration-validation:none", &ctx(Scope::Scalar, ElementType::Duration)).unwrap();
        assert_eq!(rule.kind, RuleKind::DurationValidationNone);
        let rule = interpret("+protoc-gen-crd:duration-validation:none", &ctx(Scope::List, ElementType::Duration)).unwrap();
        assert_eq!(rule.target, RuleTarget::ListItem);
        let err = interpret("+protoc-gen-crd:duration-validation:none", &ctx(Scope::Scalar, ElementType::String)).unwrap_err();
        assert!(matches!(err, CrdError::TypeMismatch { .. }));
    }

    #[test]
    fn test_int_or_string() {
        for element in [ElementType::Integer, ElementType::Number, ElementType::String] {
            let rule = interpret("+protoc-gen-crd:validation:XIntOrString", &ctx(Scope::Scalar, element)).unwrap();
            assert_eq!(rule.kind, RuleKind::IntOrString);
        }
        let err = interpret("+protoc-gen-crd:validation:XIntOrString", &ctx(Scope::Scalar, ElementType::Bool)).unwrap_err();
        assert!(matches!(err, CrdError::TypeMismatch { .. }));
    }

    #[test]
    fn test_ignore_sub_validation() {
        let marker = "+protoc-gen-crd:validation:IgnoreSubValidation:\"host must be set\"";
        let rule = interpret(marker, &ctx(Scope::Scalar, message(&["host must be set", "has(self.host)"]))).unwrap();
        assert_eq!(rule.kind, RuleKind::IgnoreSubValidation(vec!["host must be set".into()]));

        let err = interpret(marker, &ctx(Scope::Scalar, message(&["other"]))).unwrap_err();
        assert!(matches!(err, CrdError::UnknownSubValidation { ref id, .. } if id == "host must be set"));

        let err = interpret(marker, &ctx(Scope::Scalar, ElementType::String)).unwrap_err();
        assert!(matches!(err, CrdError::TypeMismatch { .. }));
    }

    #[test]
    fn test_kubebuilder_markers() {
        let scalar = |e| ctx(Scope::Scalar, e);
        assert_eq!(
            interpret("+kubebuilder:validation:MaxLength=5", &scalar(ElementType::String)).unwrap().kind,
            RuleKind::MaxLength(5)
        );
        assert!(matches!(
            interpret("+kubebuilder:validation:MaxLength=5", &scalar(ElementType::Integer)),
            Err(CrdError::TypeMismatch { .. })
        ));
        assert!(matches!(
            interpret("+kubebuilder:validation:MaxItems=5", &scalar(ElementType::String)),
            Err(CrdError::ScopeMismatch { .. })
        ));
        assert_eq!(
            interpret("+kubebuilder:validation:MaxItems=5", &ctx(Scope::List, ElementType::String)).unwrap().kind,
            RuleKind::MaxItems(5)
        );
        assert!(matches!(
            interpret("+kubebuilder:validation:MaxLength=5", &ctx(Scope::List, ElementType::String)),
            Err(CrdError::ScopeMismatch { .. })
        ));
        assert_eq!(
            interpret("+kubebuilder:validation:MaxProperties=3", &ctx(Scope::Map, ElementType::String)).unwrap().kind,
            RuleKind::MaxProperties(3)
        );
        assert!(matches!(
            interpret("+kubebuilder:validation:Maximum=10", &scalar(ElementType::String)),
            Err(CrdError::TypeMismatch { .. })
        ));
        assert!(matches!(
            interpret("+kubebuilder:validation:Pattern=`(`", &scalar(ElementType::String)),
            Err(CrdError::InvalidRule { .. })
        ));
        assert_eq!(
            interpret("+kubebuilder:validation:Required", &ctx(Scope::Map, ElementType::String)).unwrap().kind,
            RuleKind::Required
        );
    }

    #[test]
    fn test_cel_rules_are_expanded() {
        let rule = interpret(
            "+kubebuilder:validation:XValidation:rule=\"default(self.mode, 'A') == 'A'\",message=\"mode\"",
            &ctx(Scope::Scalar, message(&[])),
        )
        .unwrap();
        assert_eq!(
            rule.kind,
            RuleKind::Cel(CelRule::new("(has(self.mode) ? self.mode : 'A') == 'A'", Some("mode".into())))
        );

        let err = interpret(
            "+kubebuilder:validation:XValidation:rule=\"oneof(self.a)\"",
            &ctx(Scope::Scalar, message(&[])),
        )
        .unwrap_err();
        assert!(matches!(err, CrdError::MalformedMacro { .. }), "{:?}", err);

        let err = interpret(
            "+kubebuilder:validation:XValidation:rule=\"self.a ==\"",
            &ctx(Scope::Scalar, message(&[])),
        )
        .unwrap_err();
        assert!(matches!(err, CrdError::InvalidRule { .. }));
    }

    #[test]
    fn test_message_scope() {
        let own = ctx(Scope::Message, message(&[]));
        let rule = interpret("+kubebuilder:validation:XValidation:rule=\"has(self.a)\"", &own).unwrap();
        assert_eq!(rule.target, RuleTarget::Message);
        assert_eq!(
            interpret("+kubebuilder:validation:MinProperties=1", &own).unwrap().kind,
            RuleKind::MinProperties(1)
        );
        assert!(matches!(
            interpret("+kubebuilder:validation:MaxLength=1", &own),
            Err(CrdError::ScopeMismatch { .. })
        ));
        assert!(matches!(
            interpret("+protoc-gen-crd:map-value-validation:MaxLength=1", &own),
            Err(CrdError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_markers_are_unresolved() {
        let err = interpret("+kubebuilder:validation:Frobnicate", &ctx(Scope::Scalar, ElementType::String)).unwrap_err();
        assert!(matches!(err, CrdError::UnresolvedMarker { .. }));
    }

    #[test]
    fn test_bad_arguments_are_invalid_rules() {
        let err = interpret("+kubebuilder:validation:MaxLength=abc", &ctx(Scope::Scalar, ElementType::String)).unwrap_err();
        match err {
            CrdError::InvalidRule { path, msg, .. } => {
                assert_eq!(path, "demo.Spec.field");
                assert_eq!(msg, "MaxLength expects a non-negative integer, got \"abc\"");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            interpret("+kubebuilder:validation:XValidation:message=\"m\"", &ctx(Scope::Message, message(&[]))),
            Err(CrdError::InvalidRule { .. })
        ));
    }
}
