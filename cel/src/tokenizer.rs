use lazy_static::lazy_static;
use regex::Regex;

use crate::error::CelError;

lazy_static! {
    pub static ref TOKEN_REGEX: Regex = Regex::new(concat!(
        r#"((?:[rR][bB]?|[bB][rR]?)?(?:"""(?s:.*?)"""|'''(?s:.*?)'''|"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*')"#,
        r"|0[xX][0-9a-fA-F]+[uU]?",
        r"|\d+\.\d+(?:[eE][+-]?\d+)?",
        r"|\d+[eE][+-]?\d+",
        r"|\d+[uU]?",
        r"|[A-Za-z_][A-Za-z0-9_]*",
        r"|==|!=|<=|>=|&&|\|\|",
        r"|[-+*/%!<>?:.,()\[\]{}]",
        r"|\s+)",
    ))
    .unwrap();
    pub static ref WHITESPACE_RX: Regex = Regex::new(r"^\s+$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text:   String,
    pub column: usize,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        self.text.is_empty()
    }
}

/// Splits a CEL expression into tokens, dropping whitespace.
/// The returned list always ends with an empty EOF token.
pub fn tokenize_expr(text: &str) -> Result<Vec<Token>, CelError> {
    let mut tokens   = Vec::new();
    let mut last_end = 0;

    for mat in TOKEN_REGEX.find_iter(text) {
        if mat.start() > last_end {
            return Err(CelError::Parse {
                msg:    format!("unexpected text {:?}", &text[last_end..mat.start()]),
                column: last_end + 1,
            });
        }

        let part = mat.as_str();
        if !WHITESPACE_RX.is_match(part) {
            tokens.push(Token {
                text:   part.to_string(),
                column: mat.start() + 1,
            });
        }
        last_end = mat.end();
    }

    if last_end != text.len() {
        return Err(CelError::Parse {
            msg:    format!("unexpected text {:?}", &text[last_end..]),
            column: last_end + 1,
        });
    }

    tokens.push(Token {
        text:   String::new(),
        column: text.len() + 1,
    });
    Ok(tokens)
}
