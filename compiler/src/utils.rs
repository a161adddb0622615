use crate::error::CrdError;

pub fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("{:?}", text))
}

pub fn error(msg: &str, line: usize, column: usize) -> CrdError {
    CrdError::ParseError {
        msg: msg.to_string(),
        line,
        column,
    }
}

/// The JSON name protoc derives for a field: `max_body_size` becomes `maxBodySize`.
pub fn to_json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Strips the quotes from a proto string literal and resolves simple escapes.
pub fn unquote(text: &str) -> String {
    let inner = if text.len() >= 2 {
        &text[1..text.len() - 1]
    } else {
        text
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_names() {
        assert_eq!(to_json_name("max_body_size"), "maxBodySize");
        assert_eq!(to_json_name("hosts"), "hosts");
        assert_eq!(to_json_name("tls_v1_3"), "tlsV13");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""google/protobuf/duration.proto""#), "google/protobuf/duration.proto");
        assert_eq!(unquote(r#"'a\'b'"#), "a'b");
        assert_eq!(quote("x\"y"), r#""x\"y""#);
    }
}
