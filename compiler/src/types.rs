use serde::Serialize;

/// A leading comment block, one entry per source line with the comment
/// syntax stripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Comments {
    pub lines: Vec<String>,
    pub line:  usize,
}

impl Comments {
    /// Lines starting with `+`, trimmed. Includes markers for other tools.
    pub fn marker_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| l.starts_with('+'))
    }

    /// The non-marker lines joined with newlines, or `None` when blank.
    pub fn description(&self) -> Option<String> {
        let text: Vec<&str> = self
            .lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.starts_with('+'))
            .collect();
        let start = text.iter().position(|l| !l.is_empty())?;
        let end = text.iter().rposition(|l| !l.is_empty())?;
        Some(text[start..=end].join("\n"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtoFile {
    pub syntax:   Option<String>,
    pub package:  Option<String>,
    pub imports:  Vec<String>,
    pub messages: Vec<Message>,
    pub enums:    Vec<Enum>,
    /// Comment blocks that were not attached to a message or field.
    pub detached: Vec<Comments>,
}

impl ProtoFile {
    pub fn is_proto3(&self) -> bool {
        self.syntax.as_deref() == Some("proto3")
    }

    /// Every message in the file, nested ones included, outer before inner.
    pub fn all_messages(&self) -> Vec<&Message> {
        fn walk<'a>(msgs: &'a [Message], out: &mut Vec<&'a Message>) {
            for m in msgs {
                out.push(m);
                walk(&m.messages, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.messages, &mut out);
        out
    }

    /// Every enum in the file, nested ones included.
    pub fn all_enums(&self) -> Vec<&Enum> {
        let mut out: Vec<&Enum> = self.enums.iter().collect();
        for m in self.all_messages() {
            out.extend(m.enums.iter());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Singular,
    Optional,
    Repeated,
    Map { key: String },
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Singular => "singular",
            FieldKind::Optional => "optional",
            FieldKind::Repeated => "repeated",
            FieldKind::Map { .. } => "map",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name:      String,
    pub json_name: String,
    pub line:      usize,
    pub column:    usize,
    pub number:    i64,
    pub kind:      FieldKind,
    /// Element type: the value type for maps, the item type for repeated fields.
    pub type_:     String,
    pub oneof:     Option<String>,
    pub required:  bool,
    pub options:   Vec<(String, String)>,
    pub comments:  Comments,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Oneof {
    pub name:   String,
    pub line:   usize,
    pub column: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub name:           String,
    pub full_name:      String,
    pub line:           usize,
    pub column:         usize,
    pub fields:         Vec<Field>,
    pub oneofs:         Vec<Oneof>,
    pub messages:       Vec<Message>,
    pub enums:          Vec<Enum>,
    pub reserved_nums:  Vec<(i64, i64)>,
    pub reserved_names: Vec<String>,
    pub comments:       Comments,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumValue {
    pub name:   String,
    pub line:   usize,
    pub column: usize,
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enum {
    pub name:           String,
    pub full_name:      String,
    pub line:           usize,
    pub column:         usize,
    pub values:         Vec<EnumValue>,
    pub allow_alias:    bool,
    pub reserved_nums:  Vec<(i64, i64)>,
    pub reserved_names: Vec<String>,
}

/// A field type after name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TypeRef {
    Scalar(String),
    Message(String),
    Enum(String),
    /// A `google.protobuf` well-known type, by short name (`Duration`).
    WellKnown(String),
}

impl TypeRef {
    pub fn name(&self) -> String {
        match self {
            TypeRef::Scalar(n) | TypeRef::Message(n) | TypeRef::Enum(n) => n.clone(),
            TypeRef::WellKnown(n) => format!("google.protobuf.{}", n),
        }
    }
}
