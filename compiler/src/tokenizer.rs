use regex::Regex;
use lazy_static::lazy_static;
use crate::utils::{quote, error};
use crate::error::CrdError;

lazy_static! {
    pub static ref TOKEN_REGEX: Regex = Regex::new(concat!(
        r"(",
        r"/\*[\s\S]*?\*/",
        r"|//[^\n]*",
        r#"|"(?:[^"\\\n]|\\.)*""#,
        r"|'(?:[^'\\\n]|\\.)*'",
        r"|-?(?:0[xX][0-9A-Fa-f]+|\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\b",
        r"|\.?[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*",
        r"|[=;{}\[\]()<>,:]",
        r"|\s+",
        r")",
    ))
    .unwrap();
    pub static ref WHITESPACE_RX: Regex = Regex::new(r"^\s+$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text:   String,
    pub line:   usize,
    pub column: usize,
}

impl Token {
    pub fn is_comment(&self) -> bool {
        self.text.starts_with("//") || self.text.starts_with("/*")
    }

    /// Line on which the token ends (block comments can span lines).
    pub fn end_line(&self) -> usize {
        self.line + self.text.matches('\n').count()
    }

    /// Comment text split into lines, with the comment syntax removed.
    pub fn comment_lines(&self) -> Vec<String> {
        if let Some(body) = self.text.strip_prefix("/*") {
            let body = body.strip_suffix("*/").unwrap_or(body);
            body.lines()
                .map(|l| {
                    let l = l.trim_start();
                    l.strip_prefix('*').unwrap_or(l).to_string()
                })
                .collect()
        } else {
            let body = self.text.trim_start_matches('/');
            vec![body.strip_prefix(' ').unwrap_or(body).to_string()]
        }
    }
}

/// Splits proto source into tokens. Comments are kept as tokens; the final
/// token is an empty EOF marker.
pub fn tokenize_schema(text: &str) -> Result<Vec<Token>, CrdError> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut column = 1;
    let mut last_end = 0;

    for mat in TOKEN_REGEX.find_iter(text) {
        let start = mat.start();
        let end   = mat.end();
        let part  = mat.as_str();

        if start > last_end {
            let unexpected = &text[last_end..start];
            return Err(error(
                &format!("Syntax error: {}", quote(unexpected)),
                line,
                column,
            ));
        }

        if !WHITESPACE_RX.is_match(part) {
            tokens.push(Token {
                text:   part.to_string(),
                line,
                column,
            });
        }

        let newline_count = part.matches('\n').count();
        if newline_count > 0 {
            line += newline_count;
            if let Some(last_line_part) = part.split('\n').last() {
                column = last_line_part.chars().count() + 1;
            }
        } else {
            column += part.chars().count();
        }

        last_end = end;
    }

    if last_end != text.len() {
        let unexpected = &text[last_end..];
        return Err(error(
            &format!("Syntax error: {}", quote(unexpected)),
            line,
            column,
        ));
    }

    tokens.push(Token {
        text:   "".to_string(),
        line,
        column,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_field() {
        let input = "uint32 port = 1;";
        let expected = vec![
            Token { text: "uint32".into(), line: 1, column: 1 },
            Token { text: "port".into(),   line: 1, column: 8 },
            Token { text: "=".into(),      line: 1, column: 13 },
            Token { text: "1".into(),      line: 1, column: 15 },
            Token { text: ";".into(),      line: 1, column: 16 },
            Token { text: "".into(),       line: 1, column: 17 },
        ];
        let got = tokenize_schema(input).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_tokenize_keeps_comments() {
        let input = "// +kubebuilder:validation:MaxLength=5\nstring name = 2;";
        let got = tokenize_schema(input).unwrap();
        assert!(got[0].is_comment());
        assert_eq!(got[0].comment_lines(), vec!["+kubebuilder:validation:MaxLength=5"]);
        assert_eq!(got[1], Token { text: "string".into(), line: 2, column: 1 });
    }

    #[test]
    fn test_tokenize_block_comment_and_qualified_names() {
        let input = "/* Spec.\n * More.\n */\ngoogle.protobuf.Duration t = 3 [(google.api.field_behavior) = REQUIRED];";
        let got = tokenize_schema(input).unwrap();
        assert_eq!(got[0].end_line(), 3);
        assert_eq!(got[0].comment_lines(), vec!["Spec.", " More.", ""]);
        assert_eq!(got[1].text, "google.protobuf.Duration");
        assert_eq!(got[1].line, 4);
        let texts: Vec<&str> = got.iter().map(|t| t.text.as_str()).collect();
        assert!(texts.contains(&"google.api.field_behavior"));
        assert!(texts.contains(&"REQUIRED"));
    }

    #[test]
    fn test_tokenize_strings_and_numbers() {
        let got = tokenize_schema(r#"import "a.proto"; reserved 2, 15 to 9; x = -1;"#).unwrap();
        let texts: Vec<&str> = got.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["import", "\"a.proto\"", ";", "reserved", "2", ",", "15", "to", "9", ";", "x", "=", "-1", ";", ""]
        );
    }

    #[test]
    fn test_tokenize_unexpected_text() {
        let err = tokenize_schema("string x = 10 @").unwrap_err();
        assert!(
            matches!(err, CrdError::ParseError { line: 1, column: 15, .. }),
            "expected a ParseError but got {:?}",
            err
        );
    }
}
