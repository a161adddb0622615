use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    ast::{BinaryOp, Expr, Literal, UnaryOp},
    error::CelError,
    tokenizer::{tokenize_expr, Token},
};

lazy_static! {
    static ref IDENTIFIER:  Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref INT_LIT:     Regex = Regex::new(r"^(?:0[xX][0-9a-fA-F]+|\d+)$").unwrap();
    static ref UINT_LIT:    Regex = Regex::new(r"^(?:0[xX][0-9a-fA-F]+|\d+)[uU]$").unwrap();
    static ref DOUBLE_LIT:  Regex = Regex::new(r"^\d+(?:\.\d+)?(?:[eE][+-]?\d+)?$").unwrap();
    static ref STRING_LIT:  Regex = Regex::new(r#"^(?:[rR][bB]?|[bB][rR]?)?["']"#).unwrap();
}

/// Nesting limit for parenthesized, bracketed and unary sub-expressions.
pub const MAX_DEPTH: usize = 100;

const RESERVED: [&str; 19] = [
    "as", "break", "const", "continue", "else", "for", "function", "if", "import", "let",
    "loop", "package", "namespace", "return", "var", "void", "while", "in", "__proto__",
];

/// Parses a CEL expression into an [`Expr`] tree.
pub fn parse_expr(text: &str) -> Result<Expr, CelError> {
    let tokens = tokenize_expr(text)?;
    let mut parser = Parser { tokens: &tokens, index: 0, depth: 0 };
    let expr = parser.expr()?;
    let tok = parser.current();
    if !tok.is_eof() {
        return Err(parser.unexpected(tok));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    index:  usize,
    depth:  usize,
}

impl<'a> Parser<'a> {
    fn current(&self) -> &'a Token {
        // The tokenizer always terminates the list with an EOF token.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek(&self, offset: usize) -> &'a Token {
        &self.tokens[(self.index + offset).min(self.tokens.len() - 1)]
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.current().text == text {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> Result<(), CelError> {
        if !self.eat(text) {
            let tok = self.current();
            return Err(CelError::Parse {
                msg:    format!("expected {:?} but found {}", text, describe(tok)),
                column: tok.column,
            });
        }
        Ok(())
    }

    fn unexpected(&self, tok: &Token) -> CelError {
        CelError::Parse {
            msg:    format!("unexpected {}", describe(tok)),
            column: tok.column,
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Expr, CelError>) -> Result<Expr, CelError> {
        if self.depth >= MAX_DEPTH {
            return Err(CelError::Parse {
                msg:    "expression nested too deeply".to_string(),
                column: self.current().column,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<Expr, CelError> {
        self.nested(Self::conditional)
    }

    // conditional := or ('?' or ':' expr)?
    fn conditional(&mut self) -> Result<Expr, CelError> {
        let cond = self.or()?;
        if self.eat("?") {
            let then = self.or()?;
            self.expect(":")?;
            let otherwise = self.expr()?;
            return Ok(Expr::conditional(cond, then, otherwise));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.and()?;
        while self.eat("||") {
            let rhs = self.and()?;
            lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.relation()?;
        while self.eat("&&") {
            let rhs = self.relation()?;
            lhs = Expr::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn relation(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.addition()?;
        loop {
            let op = match self.current().text.as_str() {
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Ne,
                "<"  => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">"  => BinaryOp::Gt,
                ">=" => BinaryOp::Ge,
                "in" => BinaryOp::In,
                _ => return Ok(lhs),
            };
            self.index += 1;
            let rhs = self.addition()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn addition(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.multiplication()?;
        loop {
            let op = match self.current().text.as_str() {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.index += 1;
            let rhs = self.multiplication()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn multiplication(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.current().text.as_str() {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.index += 1;
            let rhs = self.unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, CelError> {
        if self.eat("!") {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        if self.current().text == "-" {
            // Fold `-<number>` into a negative literal unless a member access follows.
            let number = self.peek(1);
            let after  = self.peek(2).text.as_str();
            let is_number = INT_LIT.is_match(&number.text) || DOUBLE_LIT.is_match(&number.text);
            if is_number && !matches!(after, "." | "[" | "(") {
                self.index += 2;
                return negative_literal(number);
            }
            self.index += 1;
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) });
        }
        self.member()
    }

    fn member(&mut self) -> Result<Expr, CelError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let tok = self.current();
                if !IDENTIFIER.is_match(&tok.text) {
                    return Err(CelError::Parse {
                        msg:    format!("expected field name but found {}", describe(tok)),
                        column: tok.column,
                    });
                }
                self.index += 1;
                if self.eat("(") {
                    let args = self.arguments(")")?;
                    expr = Expr::Call {
                        target:   Some(Box::new(expr)),
                        function: tok.text.clone(),
                        args,
                    };
                } else {
                    expr = Expr::Select {
                        operand: Box::new(expr),
                        field:   tok.text.clone(),
                    };
                }
            } else if self.eat("[") {
                let index = self.expr()?;
                self.expect("]")?;
                expr = Expr::Index {
                    operand: Box::new(expr),
                    index:   Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, CelError> {
        let tok = self.current();
        let text = tok.text.as_str();

        if self.eat("(") {
            let inner = self.expr()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if self.eat("[") {
            return Ok(Expr::List(self.arguments("]")?));
        }
        if self.eat("{") {
            let mut entries = Vec::new();
            if !self.eat("}") {
                loop {
                    let key = self.expr()?;
                    self.expect(":")?;
                    let value = self.expr()?;
                    entries.push((key, value));
                    if self.eat("}") {
                        break;
                    }
                    self.expect(",")?;
                    // Trailing comma.
                    if self.eat("}") {
                        break;
                    }
                }
            }
            return Ok(Expr::Map(entries));
        }

        match text {
            "true" | "false" => {
                self.index += 1;
                return Ok(Expr::Literal(Literal::Bool(text == "true")));
            }
            "null" => {
                self.index += 1;
                return Ok(Expr::Literal(Literal::Null));
            }
            _ => {}
        }

        if STRING_LIT.is_match(text) {
            self.index += 1;
            return string_literal(tok);
        }
        if UINT_LIT.is_match(text) {
            self.index += 1;
            let digits = &text[..text.len() - 1];
            return parse_uint(digits, tok).map(|v| Expr::Literal(Literal::Uint(v)));
        }
        if INT_LIT.is_match(text) {
            self.index += 1;
            let value = parse_uint(text, tok)?;
            let value = i64::try_from(value).map_err(|_| CelError::Parse {
                msg:    format!("integer literal {} overflows int", text),
                column: tok.column,
            })?;
            return Ok(Expr::Literal(Literal::Int(value)));
        }
        if DOUBLE_LIT.is_match(text) {
            self.index += 1;
            return double_literal(text.to_string(), tok);
        }
        if IDENTIFIER.is_match(text) {
            if RESERVED.contains(&text) {
                return Err(CelError::Parse {
                    msg:    format!("reserved identifier {:?}", text),
                    column: tok.column,
                });
            }
            self.index += 1;
            if self.eat("(") {
                let args = self.arguments(")")?;
                return Ok(Expr::call(text, args));
            }
            return Ok(Expr::ident(text));
        }

        Err(self.unexpected(tok))
    }

    fn arguments(&mut self, close: &str) -> Result<Vec<Expr>, CelError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(",")?;
            if self.eat(close) {
                return Ok(args);
            }
        }
    }
}

fn describe(tok: &Token) -> String {
    if tok.is_eof() {
        "end of expression".to_string()
    } else {
        format!("{:?}", tok.text)
    }
}

fn parse_uint(text: &str, tok: &Token) -> Result<u64, CelError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse::<u64>()
    };
    parsed.map_err(|_| CelError::Parse {
        msg:    format!("invalid integer literal {}", text),
        column: tok.column,
    })
}

fn double_literal(raw: String, tok: &Token) -> Result<Expr, CelError> {
    let value = raw.parse::<f64>().map_err(|_| CelError::Parse {
        msg:    format!("invalid double literal {}", raw),
        column: tok.column,
    })?;
    Ok(Expr::Literal(Literal::Double { raw, value }))
}

fn negative_literal(tok: &Token) -> Result<Expr, CelError> {
    if INT_LIT.is_match(&tok.text) {
        let magnitude = parse_uint(&tok.text, tok)?;
        if magnitude > i64::MAX as u64 + 1 {
            return Err(CelError::Parse {
                msg:    format!("integer literal -{} overflows int", tok.text),
                column: tok.column,
            });
        }
        let value = (magnitude as i128).wrapping_neg() as i64;
        return Ok(Expr::Literal(Literal::Int(value)));
    }
    double_literal(format!("-{}", tok.text), tok)
}

fn string_literal(tok: &Token) -> Result<Expr, CelError> {
    let raw = tok.text.as_str();
    let prefix_len = raw.find(|c: char| c == '"' || c == '\'').unwrap_or(0);
    let prefix = raw[..prefix_len].to_ascii_lowercase();
    let is_raw   = prefix.contains('r');
    let is_bytes = prefix.contains('b');

    let body = &raw[prefix_len..];
    let quote_len = if body.starts_with("\"\"\"") || body.starts_with("'''") { 3 } else { 1 };
    let inner = &body[quote_len..body.len() - quote_len];

    let value = if is_raw {
        inner.as_bytes().to_vec()
    } else {
        unescape(inner, is_bytes).map_err(|msg| CelError::Parse { msg, column: tok.column })?
    };

    if is_bytes {
        return Ok(Expr::Literal(Literal::Bytes { raw: raw.to_string(), value }));
    }
    let value = String::from_utf8(value).map_err(|_| CelError::Parse {
        msg:    format!("invalid UTF-8 in string literal {}", raw),
        column: tok.column,
    })?;
    Ok(Expr::Literal(Literal::String { raw: raw.to_string(), value }))
}

// `\x`, octal, `\u` and `\U` escapes are code points in strings.
// In bytes literals `\x` and octal escapes are single bytes and unicode escapes are rejected.
fn unescape(text: &str, is_bytes: bool) -> Result<Vec<u8>, String> {
    let mut out   = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            push_char(&mut out, c);
            continue;
        }
        match chars.next() {
            Some('a')  => out.push(0x07),
            Some('b')  => out.push(0x08),
            Some('f')  => out.push(0x0c),
            Some('v')  => out.push(0x0b),
            Some('n')  => out.push(b'\n'),
            Some('r')  => out.push(b'\r'),
            Some('t')  => out.push(b'\t'),
            Some('\\') => out.push(b'\\'),
            Some('\'') => out.push(b'\''),
            Some('"')  => out.push(b'"'),
            Some('`')  => out.push(b'`'),
            Some('?')  => out.push(b'?'),
            Some(kind @ ('x' | 'X' | 'u' | 'U')) => {
                if is_bytes && matches!(kind, 'u' | 'U') {
                    return Err(format!("unicode escape \\{} is not allowed in bytes literals", kind));
                }
                let width = match kind {
                    'u' => 4,
                    'U' => 8,
                    _   => 2,
                };
                let digits: String = chars.by_ref().take(width).collect();
                let escape = format!("\\{}{}", kind, digits);
                if digits.len() != width || !digits.chars().all(|d| d.is_ascii_hexdigit()) {
                    return Err(format!("invalid escape sequence {}", escape));
                }
                let code = u32::from_str_radix(&digits, 16).map_err(|_| format!("invalid escape sequence {}", escape))?;
                push_code(&mut out, code, is_bytes, &escape)?;
            }
            Some(first @ '0'..='3') => {
                let mut digits = first.to_string();
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(&d @ '0'..='7') => {
                            digits.push(d);
                            chars.next();
                        }
                        _ => return Err(format!("invalid octal escape \\{}", digits)),
                    }
                }
                let code = u32::from_str_radix(&digits, 8).map_err(|_| format!("invalid octal escape \\{}", digits))?;
                push_code(&mut out, code, is_bytes, &format!("\\{}", digits))?;
            }
            Some(other) => return Err(format!("invalid escape sequence \\{}", other)),
            None => return Err("dangling escape at end of string".to_string()),
        }
    }
    Ok(out)
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn push_code(out: &mut Vec<u8>, code: u32, is_bytes: bool, escape: &str) -> Result<(), String> {
    if is_bytes {
        // Only `\x` and octal escapes reach here, both at most 0xff.
        out.push(code as u8);
        return Ok(());
    }
    let decoded = char::from_u32(code).ok_or_else(|| format!("invalid code point in escape {}", escape))?;
    push_char(out, decoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) -> String {
        parse_expr(text).unwrap().to_string()
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expr("a || b && c").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Or, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_parse_member_chain() {
        let expr = parse_expr("self.spec.hosts.all(h, h.size() < 10)").unwrap();
        match expr {
            Expr::Call { target: Some(target), function, args } => {
                assert_eq!(function, "all");
                assert_eq!(args.len(), 2);
                assert_eq!(target.to_string(), "self.spec.hosts");
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_print_is_canonical() {
        assert_eq!(roundtrip("(a+b)*c"), "(a + b) * c");
        assert_eq!(roundtrip("a - (b - c)"), "a - (b - c)");
        assert_eq!(roundtrip("((a))"), "a");
        assert_eq!(roundtrip("a ? b : c ? d : e"), "a ? b : c ? d : e");
        assert_eq!(roundtrip("(a ? b : c) ? d : e"), "(a ? b : c) ? d : e");
        assert_eq!(roundtrip("{'a': [1, 2u, -3, 1.5]}"), "{'a': [1, 2u, -3, 1.5]}");
        assert_eq!(roundtrip("!(a && b)"), "!(a && b)");
        assert_eq!(roundtrip("(-1).size()"), "(-1).size()");
    }

    #[test]
    fn test_parse_string_escapes() {
        match parse_expr(r#""a\nb""#).unwrap() {
            Expr::Literal(Literal::String { value, .. }) => assert_eq!(value, "a\nb"),
            other => panic!("unexpected tree {:?}", other),
        }
        match parse_expr(r"r'\d+'").unwrap() {
            Expr::Literal(Literal::String { value, .. }) => assert_eq!(value, r"\d+"),
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_parse_numeric_escapes() {
        let string = |text: &str| match parse_expr(text).unwrap() {
            Expr::Literal(Literal::String { value, .. }) => value,
            other => panic!("unexpected tree {:?}", other),
        };
        assert_eq!(string(r"'\x41\101é\U0001F600'"), "AA\u{e9}\u{1F600}");
        assert_eq!(string(r"'\a\f\v'"), "\x07\x0c\x0b");

        match parse_expr(r"b'\xff\377a'").unwrap() {
            Expr::Literal(Literal::Bytes { value, .. }) => assert_eq!(value, vec![0xff, 0xff, b'a']),
            other => panic!("unexpected tree {:?}", other),
        }

        for bad in [r"'\x4'", r"'\xzz'", r"'\19'", r"'\400'", r"'\UFFFFFFFF'", r"b'\u0041'", r"'\q'"] {
            match parse_expr(bad) {
                Err(CelError::Parse { msg, .. }) => assert!(msg.contains('\\'), "{}: {}", bad, msg),
                other => panic!("{} parsed as {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse_expr(&nested(MAX_DEPTH - 1)).is_ok());
        for text in [nested(50_000), "!".repeat(50_000) + "a", format!("{}1{}", "[".repeat(50_000), "]".repeat(50_000))] {
            match parse_expr(&text) {
                Err(CelError::Parse { msg, column }) => {
                    assert_eq!(msg, "expression nested too deeply");
                    assert!(column > 0);
                }
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expr("a +").is_err());
        assert!(parse_expr("f(a,").is_err());
        assert!(parse_expr("a b").is_err());
        assert!(parse_expr("if").is_err());
        assert!(parse_expr("9223372036854775808").is_err());
        assert!(parse_expr("-9223372036854775808").is_ok());
    }
}
