use std::collections::{BTreeMap, HashMap};
use crate::{
    parser::MAX_FIELD_NUMBER,
    types::{Enum, FieldKind, Message, ProtoFile, TypeRef},
    utils::quote,
    error::CrdError,
};

pub const SCALAR_TYPES: [&str; 15] = [
    "double", "float", "int32", "int64", "uint32", "uint64", "sint32", "sint64",
    "fixed32", "fixed64", "sfixed32", "sfixed64", "bool", "string", "bytes",
];

/// `google.protobuf` types with a fixed schema mapping.
pub const WELL_KNOWN_TYPES: [&str; 17] = [
    "Duration", "Timestamp", "Struct", "Value", "ListValue", "Any", "Empty", "FieldMask",
    "DoubleValue", "FloatValue", "Int64Value", "UInt64Value", "Int32Value", "UInt32Value",
    "BoolValue", "StringValue", "BytesValue",
];

const MAP_KEY_TYPES: [&str; 12] = [
    "int32", "int64", "uint32", "uint64", "sint32", "sint64",
    "fixed32", "fixed64", "sfixed32", "sfixed64", "bool", "string",
];

const IMPLEMENTATION_RESERVED: (i64, i64) = (19_000, 19_999);

/// Fully-qualified message and enum names of a file.
pub struct SymbolTable<'a> {
    messages: BTreeMap<String, &'a Message>,
    enums:    BTreeMap<String, &'a Enum>,
}

impl<'a> SymbolTable<'a> {
    /// Collects every message and enum, rejecting duplicate names.
    pub fn build(file: &'a ProtoFile) -> Result<SymbolTable<'a>, CrdError> {
        let mut table = SymbolTable {
            messages: BTreeMap::new(),
            enums:    BTreeMap::new(),
        };
        for msg in file.all_messages() {
            table.claim(&msg.full_name)?;
            table.messages.insert(msg.full_name.clone(), msg);
        }
        for en in file.all_enums() {
            table.claim(&en.full_name)?;
            table.enums.insert(en.full_name.clone(), en);
        }
        Ok(table)
    }

    fn claim(&self, name: &str) -> Result<(), CrdError> {
        if self.messages.contains_key(name) || self.enums.contains_key(name) {
            return Err(CrdError::VerifierError(format!(
                "The type {} is defined twice",
                quote(name)
            )));
        }
        Ok(())
    }

    pub fn message(&self, full_name: &str) -> Option<&'a Message> {
        self.messages.get(full_name).copied()
    }

    pub fn enum_(&self, full_name: &str) -> Option<&'a Enum> {
        self.enums.get(full_name).copied()
    }

    /// Resolves a type reference as written inside `scope` (a message or
    /// package name), searching from the innermost scope outwards.
    pub fn resolve(&self, scope: &str, name: &str) -> Option<TypeRef> {
        if SCALAR_TYPES.contains(&name) {
            return Some(TypeRef::Scalar(name.to_string()));
        }
        if let Some(short) = name.trim_start_matches('.').strip_prefix("google.protobuf.") {
            if WELL_KNOWN_TYPES.contains(&short) {
                return Some(TypeRef::WellKnown(short.to_string()));
            }
        }

        let lookup = |full: &str| {
            if self.messages.contains_key(full) {
                Some(TypeRef::Message(full.to_string()))
            } else if self.enums.contains_key(full) {
                Some(TypeRef::Enum(full.to_string()))
            } else {
                None
            }
        };

        if let Some(absolute) = name.strip_prefix('.') {
            return lookup(absolute);
        }
        let mut scope = scope.to_string();
        loop {
            let candidate = if scope.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", scope, name)
            };
            if let Some(found) = lookup(&candidate) {
                return Some(found);
            }
            if scope.is_empty() {
                return None;
            }
            scope = match scope.rfind('.') {
                Some(i) => scope[..i].to_string(),
                None => String::new(),
            };
        }
    }
}

/// Returns `Ok(())` if verification passed, or `Err(CrdError::VerifierError(_))` otherwise.
pub fn verify_schema(file: &ProtoFile) -> Result<(), CrdError> {
    // 1) Check duplicate type names
    let symbols = SymbolTable::build(file)?;

    // 2) Check fields inside each message
    for msg in file.all_messages() {
        verify_message(msg, &symbols)?;
    }

    // 3) Check enum values
    for en in file.all_enums() {
        verify_enum(en, file.is_proto3())?;
    }

    // 4) Check that messages do not contain themselves
    let mut state: HashMap<String, u8> = HashMap::new();
    fn check_recursion(
        name: &str,
        symbols: &SymbolTable,
        state: &mut HashMap<String, u8>,
    ) -> Result<(), CrdError> {
        let msg = match symbols.message(name) {
            Some(msg) => msg,
            None => return Ok(()),
        };
        if let Some(&s) = state.get(name) {
            if s == 1 {
                return Err(CrdError::VerifierError(format!(
                    "Recursive nesting of {} cannot be expressed as a CRD schema",
                    quote(name)
                )));
            } else if s == 2 {
                return Ok(());
            }
        }
        state.insert(name.to_string(), 1);
        for field in &msg.fields {
            if let Some(TypeRef::Message(ty)) = symbols.resolve(&msg.full_name, &field.type_) {
                check_recursion(&ty, symbols, state)?;
            }
        }
        state.insert(name.to_string(), 2);
        Ok(())
    }

    for msg in file.all_messages() {
        check_recursion(&msg.full_name, &symbols, &mut state)?;
    }

    Ok(())
}

fn in_ranges(ranges: &[(i64, i64)], value: i64) -> bool {
    ranges.iter().any(|&(lo, hi)| lo <= value && value <= hi)
}

fn verify_message(msg: &Message, symbols: &SymbolTable) -> Result<(), CrdError> {
    let mut names: Vec<&str> = Vec::new();
    let mut numbers: Vec<i64> = Vec::new();
    let mut json_names: Vec<(&str, &str)> = Vec::new();

    for field in &msg.fields {
        let field_path = format!("{}.{}", msg.full_name, field.name);

        if names.contains(&field.name.as_str()) {
            return Err(CrdError::VerifierError(format!(
                "The field {} is defined twice",
                quote(&field_path)
            )));
        }
        if let Some((_, other)) = json_names.iter().find(|(json, _)| *json == field.json_name) {
            return Err(CrdError::VerifierError(format!(
                "The fields {} and {} share the JSON name {}",
                quote(&format!("{}.{}", msg.full_name, other)),
                quote(&field_path),
                quote(&field.json_name)
            )));
        }
        if numbers.contains(&field.number) {
            return Err(CrdError::VerifierError(format!(
                "The number {} for field {} is used twice",
                field.number,
                quote(&field_path)
            )));
        }
        if field.number < 1 || field.number > MAX_FIELD_NUMBER {
            return Err(CrdError::VerifierError(format!(
                "The number for field {} must be between 1 and {}",
                quote(&field_path),
                MAX_FIELD_NUMBER
            )));
        }
        if in_ranges(&[IMPLEMENTATION_RESERVED], field.number) {
            return Err(CrdError::VerifierError(format!(
                "The number {} for field {} is reserved for the protobuf implementation",
                field.number,
                quote(&field_path)
            )));
        }
        if in_ranges(&msg.reserved_nums, field.number) {
            return Err(CrdError::VerifierError(format!(
                "The number {} for field {} is reserved",
                field.number,
                quote(&field_path)
            )));
        }
        if msg.reserved_names.contains(&field.name) {
            return Err(CrdError::VerifierError(format!(
                "The name of field {} is reserved",
                quote(&field_path)
            )));
        }

        if symbols.resolve(&msg.full_name, &field.type_).is_none() {
            return Err(CrdError::VerifierError(format!(
                "The type {} is not defined for field {}",
                quote(&field.type_),
                quote(&field_path)
            )));
        }
        if let FieldKind::Map { ref key } = field.kind {
            if !MAP_KEY_TYPES.contains(&key.as_str()) {
                return Err(CrdError::VerifierError(format!(
                    "The key type {} of map field {} must be an integral, bool or string scalar",
                    quote(key),
                    quote(&field_path)
                )));
            }
        }

        names.push(&field.name);
        numbers.push(field.number);
        json_names.push((&field.json_name, &field.name));
    }
    Ok(())
}

fn verify_enum(en: &Enum, proto3: bool) -> Result<(), CrdError> {
    if en.values.is_empty() {
        return Err(CrdError::VerifierError(format!(
            "The enum {} must have at least one value",
            quote(&en.full_name)
        )));
    }
    if proto3 && en.values[0].number != 0 {
        return Err(CrdError::VerifierError(format!(
            "The first value of enum {} must be zero",
            quote(&en.full_name)
        )));
    }

    let mut names: Vec<&str> = Vec::new();
    let mut numbers: Vec<i64> = Vec::new();
    for value in &en.values {
        if names.contains(&value.name.as_str()) {
            return Err(CrdError::VerifierError(format!(
                "The enum value {} is defined twice in {}",
                quote(&value.name),
                quote(&en.full_name)
            )));
        }
        if numbers.contains(&value.number) && !en.allow_alias {
            return Err(CrdError::VerifierError(format!(
                "The number {} of enum value {} is used twice in {}",
                value.number,
                quote(&value.name),
                quote(&en.full_name)
            )));
        }
        if in_ranges(&en.reserved_nums, value.number) || en.reserved_names.contains(&value.name) {
            return Err(CrdError::VerifierError(format!(
                "The enum value {} in {} is reserved",
                quote(&value.name),
                quote(&en.full_name)
            )));
        }
        names.push(&value.name);
        numbers.push(value.number);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse_schema, tokenizer::tokenize_schema};

    fn verify(text: &str) -> Result<(), CrdError> {
        let tokens = tokenize_schema(text)?;
        let file = parse_schema(&tokens)?;
        verify_schema(&file)
    }

    fn verifier_message(text: &str) -> String {
        match verify(text) {
            Err(CrdError::VerifierError(msg)) => msg,
            other => panic!("expected a VerifierError, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_nested_scopes_and_well_known_types() {
        let text = r#"
syntax = "proto3";
package demo.v1;
message Outer {
  message Inner { Kind kind = 1; }
  enum Kind { KIND_UNSET = 0; }
  Inner inner = 1;
  .demo.v1.Outer.Inner again = 2;
  google.protobuf.Duration timeout = 3;
  map<string, Inner> by_name = 4;
}
"#;
        assert!(verify(text).is_ok());
    }

    #[test]
    fn test_resolution_walks_outwards() {
        let tokens = tokenize_schema("package a.b; message M { message N {} } message O { M.N n = 1; }").unwrap();
        let file = parse_schema(&tokens).unwrap();
        let symbols = SymbolTable::build(&file).unwrap();
        assert_eq!(symbols.resolve("a.b.O", "M.N"), Some(TypeRef::Message("a.b.M.N".into())));
        assert_eq!(symbols.resolve("a.b.O", "int32"), Some(TypeRef::Scalar("int32".into())));
        assert_eq!(
            symbols.resolve("a.b.O", "google.protobuf.Struct"),
            Some(TypeRef::WellKnown("Struct".into()))
        );
        assert_eq!(symbols.resolve("a.b.O", "Missing"), None);
    }

    #[test]
    fn test_rejects_duplicates() {
        assert!(verifier_message("message A {} message A {}").contains("defined twice"));
        assert!(verifier_message("message A { string x = 1; int32 x = 2; }").contains("defined twice"));
        assert!(verifier_message("message A { string x = 1; int32 y = 1; }").contains("used twice"));
    }

    #[test]
    fn test_field_number_rules() {
        assert!(verifier_message("message A { string x = 0; }").contains("between 1 and"));
        assert!(verifier_message("message A { string x = 536870912; }").contains("between 1 and"));
        assert!(verifier_message("message A { string x = 19500; }").contains("implementation"));
        assert!(verifier_message("message A { reserved 2 to 4; string x = 3; }").contains("reserved"));
        assert!(verifier_message("message A { reserved \"x\"; string x = 1; }").contains("reserved"));
    }

    #[test]
    fn test_type_rules() {
        assert!(verifier_message("message A { Missing x = 1; }").contains("not defined"));
        assert!(verifier_message("message A { map<double, string> x = 1; }").contains("key type"));
        assert!(verifier_message("syntax = \"proto3\"; enum E { ONE = 1; }").contains("must be zero"));
        assert!(verify("syntax = \"proto2\"; enum E { ONE = 1; }").is_ok());
    }

    #[test]
    fn test_rejects_recursion() {
        let msg = verifier_message("message A { B b = 1; } message B { repeated A a = 1; }");
        assert!(msg.contains("Recursive nesting"), "{}", msg);
    }

    #[test]
    fn test_rejects_json_name_collisions() {
        let msg = verifier_message("message A { string foo_bar = 1; int32 fooBar = 2; }");
        assert_eq!(msg, "The fields \"A.foo_bar\" and \"A.fooBar\" share the JSON name \"fooBar\"");

        let msg = verifier_message("message A { string a = 1; string b = 2 [json_name = \"a\"]; }");
        assert!(msg.contains("share the JSON name"), "{}", msg);
    }
}
