use crate::{
    tokenizer::Token,
    types::{Comments, Enum, EnumValue, Field, FieldKind, Message, Oneof, ProtoFile},
    utils::{error, quote, to_json_name, unquote},
    error::CrdError,
};
use lazy_static::lazy_static;
use regex::Regex;

/// Largest valid field number.
pub const MAX_FIELD_NUMBER: i64 = 536_870_911;

lazy_static! {
    static ref IDENTIFIER:       Regex = Regex::new(r"^\.?[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref SIMPLE_IDENT:     Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref SUFFIX_IDENT:     Regex = Regex::new(r"^\.[A-Za-z_][A-Za-z0-9_.]*$").unwrap();
    static ref INTEGER:          Regex = Regex::new(r"^-?(?:0[xX][0-9A-Fa-f]+|\d+)$").unwrap();
    static ref NUMBER:           Regex = Regex::new(r"^-?(?:0[xX][0-9A-Fa-f]+|\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)$").unwrap();
    static ref STRING:           Regex = Regex::new(r#"^(?:"|')"#).unwrap();
    static ref EQUALS:           Regex = Regex::new(r"^=$").unwrap();
    static ref SEMICOLON:        Regex = Regex::new(r"^;$").unwrap();
    static ref COMMA:            Regex = Regex::new(r"^,$").unwrap();
    static ref LEFT_BRACE:       Regex = Regex::new(r"^\{$").unwrap();
    static ref RIGHT_BRACE:      Regex = Regex::new(r"^\}$").unwrap();
    static ref LEFT_BRACKET:     Regex = Regex::new(r"^\[$").unwrap();
    static ref RIGHT_BRACKET:    Regex = Regex::new(r"^\]$").unwrap();
    static ref LEFT_PAREN:       Regex = Regex::new(r"^\($").unwrap();
    static ref RIGHT_PAREN:      Regex = Regex::new(r"^\)$").unwrap();
    static ref LEFT_ANGLE:       Regex = Regex::new(r"^<$").unwrap();
    static ref RIGHT_ANGLE:      Regex = Regex::new(r"^>$").unwrap();
    static ref SYNTAX_KEYWORD:   Regex = Regex::new(r"^syntax$").unwrap();
    static ref PACKAGE_KEYWORD:  Regex = Regex::new(r"^package$").unwrap();
    static ref IMPORT_KEYWORD:   Regex = Regex::new(r"^import$").unwrap();
    static ref IMPORT_MODIFIER:  Regex = Regex::new(r"^(?:public|weak)$").unwrap();
    static ref OPTION_KEYWORD:   Regex = Regex::new(r"^option$").unwrap();
    static ref MESSAGE_KEYWORD:  Regex = Regex::new(r"^message$").unwrap();
    static ref ENUM_KEYWORD:     Regex = Regex::new(r"^enum$").unwrap();
    static ref ONEOF_KEYWORD:    Regex = Regex::new(r"^oneof$").unwrap();
    static ref MAP_KEYWORD:      Regex = Regex::new(r"^map$").unwrap();
    static ref SERVICE_KEYWORD:  Regex = Regex::new(r"^service$").unwrap();
    static ref RESERVED_KEYWORD: Regex = Regex::new(r"^reserved$").unwrap();
    static ref EXTENSIONS_KW:    Regex = Regex::new(r"^extensions$").unwrap();
    static ref REPEATED_LABEL:   Regex = Regex::new(r"^repeated$").unwrap();
    static ref OPTIONAL_LABEL:   Regex = Regex::new(r"^optional$").unwrap();
    static ref REQUIRED_LABEL:   Regex = Regex::new(r"^required$").unwrap();
    static ref TO_KEYWORD:       Regex = Regex::new(r"^to$").unwrap();
    static ref MAX_KEYWORD:      Regex = Regex::new(r"^max$").unwrap();
    static ref EOF:              Regex = Regex::new(r"^$").unwrap();
}

const FIELD_BEHAVIOR: &str = "(google.api.field_behavior)";

/// Parses a token stream (as produced by `tokenize_schema`) into a `ProtoFile`.
pub fn parse_schema(tokens: &[Token]) -> Result<ProtoFile, CrdError> {
    let mut parser = Parser::new(tokens);
    parser.parse_file()
}

struct Parser<'a> {
    tokens:   Vec<&'a Token>,
    comments: Vec<&'a Token>,
    attached: Vec<bool>,
    index:    usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        let (comments, code): (Vec<&Token>, Vec<&Token>) = tokens.iter().partition(|t| t.is_comment());
        Parser {
            attached: vec![false; comments.len()],
            tokens:   code,
            comments,
            index:    0,
        }
    }

    fn current_token(&self) -> &'a Token {
        // The tokenizer always ends the stream with an EOF token.
        self.tokens[self.index.min(self.tokens.len().saturating_sub(1))]
    }

    fn peek(&self, offset: usize) -> &'a Token {
        self.tokens[(self.index + offset).min(self.tokens.len().saturating_sub(1))]
    }

    fn check(&self, test: &Regex) -> bool {
        test.is_match(&self.current_token().text)
    }

    fn eat(&mut self, test: &Regex) -> bool {
        if self.check(test) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, test: &Regex, expected: &str) -> Result<&'a Token, CrdError> {
        let tok = self.current_token();
        if !self.eat(test) {
            return Err(error(
                &format!("Expected {} but found {}", expected, quote(&tok.text)),
                tok.line,
                tok.column,
            ));
        }
        Ok(tok)
    }

    fn unexpected_token(&self) -> CrdError {
        let tok = self.current_token();
        error(
            &format!("Unexpected token {}", quote(&tok.text)),
            tok.line,
            tok.column,
        )
    }

    /// Claims the comment block directly above the current token: contiguous
    /// comment lines ending on the line before it, none sharing a line with
    /// the preceding code token.
    fn leading_comments(&mut self) -> Comments {
        let cur = self.current_token();
        let prev_line = if self.index > 0 {
            self.tokens[self.index - 1].line
        } else {
            0
        };

        let mut next_line = cur.line;
        let mut taken = Vec::new();
        for (i, c) in self.comments.iter().enumerate().rev() {
            if c.line >= cur.line || self.attached[i] {
                continue;
            }
            if c.line <= prev_line || c.end_line() + 1 < next_line {
                break;
            }
            taken.push(i);
            next_line = c.line;
        }

        let mut comments = Comments::default();
        for &i in taken.iter().rev() {
            self.attached[i] = true;
            if comments.lines.is_empty() {
                comments.line = self.comments[i].line;
            }
            comments.lines.extend(self.comments[i].comment_lines());
        }
        comments
    }

    fn parse_file(&mut self) -> Result<ProtoFile, CrdError> {
        let mut file = ProtoFile {
            syntax:   None,
            package:  None,
            imports:  Vec::new(),
            messages: Vec::new(),
            enums:    Vec::new(),
            detached: Vec::new(),
        };

        while !self.eat(&EOF) {
            if self.eat(&SYNTAX_KEYWORD) {
                self.expect(&EQUALS, "\"=\"")?;
                let tok = self.expect(&STRING, "string")?;
                file.syntax = Some(unquote(&tok.text));
                self.expect(&SEMICOLON, "\";\"")?;
            } else if self.eat(&PACKAGE_KEYWORD) {
                let tok = self.expect(&IDENTIFIER, "identifier")?;
                if file.package.is_some() {
                    return Err(error("Multiple package declarations", tok.line, tok.column));
                }
                file.package = Some(tok.text.clone());
                self.expect(&SEMICOLON, "\";\"")?;
            } else if self.eat(&IMPORT_KEYWORD) {
                self.eat(&IMPORT_MODIFIER);
                let tok = self.expect(&STRING, "string")?;
                file.imports.push(unquote(&tok.text));
                self.expect(&SEMICOLON, "\";\"")?;
            } else if self.check(&OPTION_KEYWORD) {
                self.parse_option_statement()?;
            } else if self.check(&MESSAGE_KEYWORD) {
                let scope = file.package.clone().unwrap_or_default();
                file.messages.push(self.parse_message(&scope)?);
            } else if self.check(&ENUM_KEYWORD) {
                let scope = file.package.clone().unwrap_or_default();
                file.enums.push(self.parse_enum(&scope)?);
            } else if self.eat(&SERVICE_KEYWORD) {
                self.expect(&SIMPLE_IDENT, "identifier")?;
                self.skip_block()?;
            } else if !self.eat(&SEMICOLON) {
                return Err(self.unexpected_token());
            }
        }

        for (i, tok) in self.comments.iter().enumerate() {
            if !self.attached[i] {
                file.detached.push(Comments {
                    lines: tok.comment_lines(),
                    line:  tok.line,
                });
            }
        }
        Ok(file)
    }

    fn parse_message(&mut self, scope: &str) -> Result<Message, CrdError> {
        let comments = self.leading_comments();
        self.expect(&MESSAGE_KEYWORD, "\"message\"")?;
        let name_tok = self.expect(&SIMPLE_IDENT, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;

        let mut msg = Message {
            name:           name_tok.text.clone(),
            full_name:      qualify(scope, &name_tok.text),
            line:           name_tok.line,
            column:         name_tok.column,
            fields:         Vec::new(),
            oneofs:         Vec::new(),
            messages:       Vec::new(),
            enums:          Vec::new(),
            reserved_nums:  Vec::new(),
            reserved_names: Vec::new(),
            comments,
        };

        while !self.eat(&RIGHT_BRACE) {
            if self.check(&EOF) {
                self.expect(&RIGHT_BRACE, "\"}\"")?;
            } else if self.eat(&SEMICOLON) {
                continue;
            } else if self.check(&MESSAGE_KEYWORD) {
                let nested = self.parse_message(&msg.full_name)?;
                msg.messages.push(nested);
            } else if self.check(&ENUM_KEYWORD) {
                let nested = self.parse_enum(&msg.full_name)?;
                msg.enums.push(nested);
            } else if self.check(&ONEOF_KEYWORD) {
                self.parse_oneof(&mut msg)?;
            } else if self.check(&OPTION_KEYWORD) {
                self.parse_option_statement()?;
            } else if self.check(&RESERVED_KEYWORD) {
                self.parse_reserved(&mut msg.reserved_nums, &mut msg.reserved_names)?;
            } else if self.eat(&EXTENSIONS_KW) {
                while !self.eat(&SEMICOLON) {
                    if self.check(&EOF) {
                        return Err(self.unexpected_token());
                    }
                    self.index += 1;
                }
            } else {
                let field = self.parse_field(None)?;
                msg.fields.push(field);
            }
        }

        Ok(msg)
    }

    fn parse_field(&mut self, oneof: Option<&str>) -> Result<Field, CrdError> {
        let comments = self.leading_comments();
        let label_tok = self.current_token();
        let start = self.index;

        let mut kind = FieldKind::Singular;
        if self.eat(&REPEATED_LABEL) {
            kind = FieldKind::Repeated;
        } else if self.eat(&OPTIONAL_LABEL) {
            kind = FieldKind::Optional;
        } else {
            self.eat(&REQUIRED_LABEL);
        }
        if oneof.is_some() && self.index != start {
            return Err(error("Fields in oneofs must not have labels", label_tok.line, label_tok.column));
        }

        let type_name = if self.check(&MAP_KEYWORD) && LEFT_ANGLE.is_match(&self.peek(1).text) {
            let map_tok = self.current_token();
            if kind != FieldKind::Singular {
                return Err(error("Map fields cannot have labels", map_tok.line, map_tok.column));
            }
            if oneof.is_some() {
                return Err(error("Map fields are not allowed in oneofs", map_tok.line, map_tok.column));
            }
            self.index += 1;
            self.expect(&LEFT_ANGLE, "\"<\"")?;
            let key = self.expect(&IDENTIFIER, "identifier")?;
            self.expect(&COMMA, "\",\"")?;
            let value = self.expect(&IDENTIFIER, "identifier")?;
            self.expect(&RIGHT_ANGLE, "\">\"")?;
            kind = FieldKind::Map { key: key.text.clone() };
            value.text.clone()
        } else {
            self.expect(&IDENTIFIER, "identifier")?.text.clone()
        };

        let name_tok = self.expect(&SIMPLE_IDENT, "identifier")?;
        self.expect(&EQUALS, "\"=\"")?;
        let num_tok = self.expect(&INTEGER, "integer")?;
        let number = parse_int(num_tok)?;

        let mut field = Field {
            name:      name_tok.text.clone(),
            json_name: to_json_name(&name_tok.text),
            line:      name_tok.line,
            column:    name_tok.column,
            number,
            kind,
            type_:     type_name,
            oneof:     oneof.map(str::to_string),
            required:  false,
            options:   Vec::new(),
            comments,
        };

        if self.eat(&LEFT_BRACKET) {
            loop {
                let name = self.parse_option_name()?;
                self.expect(&EQUALS, "\"=\"")?;
                let value = self.parse_constant()?;
                if name == FIELD_BEHAVIOR && value == "REQUIRED" {
                    field.required = true;
                }
                if name == "json_name" {
                    field.json_name = value.clone();
                }
                field.options.push((name, value));
                if !self.eat(&COMMA) {
                    break;
                }
            }
            self.expect(&RIGHT_BRACKET, "\"]\"")?;
        }

        self.expect(&SEMICOLON, "\";\"")?;
        Ok(field)
    }

    fn parse_oneof(&mut self, msg: &mut Message) -> Result<(), CrdError> {
        self.expect(&ONEOF_KEYWORD, "\"oneof\"")?;
        let name_tok = self.expect(&SIMPLE_IDENT, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;

        let mut oneof = Oneof {
            name:   name_tok.text.clone(),
            line:   name_tok.line,
            column: name_tok.column,
            fields: Vec::new(),
        };
        while !self.eat(&RIGHT_BRACE) {
            if self.eat(&SEMICOLON) {
                continue;
            }
            if self.check(&OPTION_KEYWORD) {
                self.parse_option_statement()?;
                continue;
            }
            if self.check(&EOF) {
                self.expect(&RIGHT_BRACE, "\"}\"")?;
            }
            let field = self.parse_field(Some(&name_tok.text))?;
            oneof.fields.push(field.name.clone());
            msg.fields.push(field);
        }
        msg.oneofs.push(oneof);
        Ok(())
    }

    fn parse_enum(&mut self, scope: &str) -> Result<Enum, CrdError> {
        self.expect(&ENUM_KEYWORD, "\"enum\"")?;
        let name_tok = self.expect(&SIMPLE_IDENT, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;

        let mut en = Enum {
            name:           name_tok.text.clone(),
            full_name:      qualify(scope, &name_tok.text),
            line:           name_tok.line,
            column:         name_tok.column,
            values:         Vec::new(),
            allow_alias:    false,
            reserved_nums:  Vec::new(),
            reserved_names: Vec::new(),
        };

        while !self.eat(&RIGHT_BRACE) {
            if self.eat(&SEMICOLON) {
                continue;
            }
            if self.check(&OPTION_KEYWORD) {
                let (name, value) = self.parse_option_statement()?;
                if name == "allow_alias" && value == "true" {
                    en.allow_alias = true;
                }
                continue;
            }
            if self.check(&RESERVED_KEYWORD) {
                self.parse_reserved(&mut en.reserved_nums, &mut en.reserved_names)?;
                continue;
            }

            let value_tok = self.expect(&SIMPLE_IDENT, "identifier")?;
            self.expect(&EQUALS, "\"=\"")?;
            let num_tok = self.expect(&INTEGER, "integer")?;
            let number = parse_int(num_tok)?;
            if self.eat(&LEFT_BRACKET) {
                loop {
                    self.parse_option_name()?;
                    self.expect(&EQUALS, "\"=\"")?;
                    self.parse_constant()?;
                    if !self.eat(&COMMA) {
                        break;
                    }
                }
                self.expect(&RIGHT_BRACKET, "\"]\"")?;
            }
            self.expect(&SEMICOLON, "\";\"")?;

            en.values.push(EnumValue {
                name:   value_tok.text.clone(),
                line:   value_tok.line,
                column: value_tok.column,
                number,
            });
        }

        Ok(en)
    }

    fn parse_reserved(&mut self, nums: &mut Vec<(i64, i64)>, names: &mut Vec<String>) -> Result<(), CrdError> {
        self.expect(&RESERVED_KEYWORD, "\"reserved\"")?;
        loop {
            if self.check(&STRING) {
                names.push(unquote(&self.current_token().text));
                self.index += 1;
            } else if self.check(&SIMPLE_IDENT) {
                names.push(self.current_token().text.clone());
                self.index += 1;
            } else {
                let start = parse_int(self.expect(&INTEGER, "integer")?)?;
                let end = if self.eat(&TO_KEYWORD) {
                    if self.eat(&MAX_KEYWORD) {
                        MAX_FIELD_NUMBER
                    } else {
                        parse_int(self.expect(&INTEGER, "integer")?)?
                    }
                } else {
                    start
                };
                nums.push((start, end));
            }
            if !self.eat(&COMMA) {
                break;
            }
        }
        self.expect(&SEMICOLON, "\";\"")?;
        Ok(())
    }

    fn parse_option_statement(&mut self) -> Result<(String, String), CrdError> {
        self.expect(&OPTION_KEYWORD, "\"option\"")?;
        let name = self.parse_option_name()?;
        self.expect(&EQUALS, "\"=\"")?;
        let value = self.parse_constant()?;
        self.expect(&SEMICOLON, "\";\"")?;
        Ok((name, value))
    }

    fn parse_option_name(&mut self) -> Result<String, CrdError> {
        let mut name = if self.eat(&LEFT_PAREN) {
            let tok = self.expect(&IDENTIFIER, "identifier")?;
            self.expect(&RIGHT_PAREN, "\")\"")?;
            format!("({})", tok.text)
        } else {
            self.expect(&IDENTIFIER, "identifier")?.text.clone()
        };
        if self.check(&SUFFIX_IDENT) {
            name.push_str(&self.current_token().text);
            self.index += 1;
        }
        Ok(name)
    }

    fn parse_constant(&mut self) -> Result<String, CrdError> {
        if self.check(&LEFT_BRACE) {
            let start = self.index;
            self.skip_block()?;
            let text: Vec<&str> = self.tokens[start..self.index].iter().map(|t| t.text.as_str()).collect();
            return Ok(text.join(" "));
        }
        if self.check(&STRING) {
            let mut value = String::new();
            while self.check(&STRING) {
                value.push_str(&unquote(&self.current_token().text));
                self.index += 1;
            }
            return Ok(value);
        }
        if self.check(&IDENTIFIER) || self.check(&NUMBER) {
            let tok = self.current_token();
            self.index += 1;
            return Ok(tok.text.clone());
        }
        Err(self.unexpected_token())
    }

    /// Skips a brace-delimited block, nested blocks included.
    fn skip_block(&mut self) -> Result<(), CrdError> {
        self.expect(&LEFT_BRACE, "\"{\"")?;
        let mut depth = 1;
        while depth > 0 {
            if self.check(&EOF) {
                return Err(self.unexpected_token());
            }
            if self.check(&LEFT_BRACE) {
                depth += 1;
            } else if self.check(&RIGHT_BRACE) {
                depth -= 1;
            }
            self.index += 1;
        }
        Ok(())
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn parse_int(tok: &Token) -> Result<i64, CrdError> {
    let text = tok.text.as_str();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    };
    parsed
        .map(|v| if negative { -v } else { v })
        .map_err(|_| error(&format!("Invalid integer {}", quote(text)), tok.line, tok.column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize_schema;

    fn parse(text: &str) -> ProtoFile {
        let tokens = tokenize_schema(text).expect("tokenize_schema failed");
        parse_schema(&tokens).expect("parse_schema failed")
    }

    #[test]
    fn test_attaches_leading_comments() {
        let file = parse(
            r#"
syntax = "proto3";
package demo.v1;

// A port.
// +kubebuilder:validation:XValidation:rule="self.number > 0"
message Port {
  // The port number.
  uint32 number = 1; // trailing

  // +kubebuilder:validation:MaxLength=8
  string name = 2;
}
"#,
        );
        let port = &file.messages[0];
        assert_eq!(port.full_name, "demo.v1.Port");
        assert_eq!(port.comments.lines.len(), 2);
        assert_eq!(port.fields[0].comments.lines, vec!["The port number."]);
        assert_eq!(port.fields[1].comments.lines, vec!["+kubebuilder:validation:MaxLength=8"]);
        assert_eq!(file.detached.len(), 1);
        assert_eq!(file.detached[0].lines, vec!["trailing"]);
    }

    #[test]
    fn test_blank_line_detaches_comment() {
        let file = parse("// +kubebuilder:validation:MaxLength=8\n\nmessage A {\n  string x = 1;\n}\n");
        assert!(file.messages[0].comments.lines.is_empty());
        assert_eq!(file.detached.len(), 1);
    }

    #[test]
    fn test_field_kinds_and_options() {
        let file = parse(
            r#"
syntax = "proto3";
import "google/api/field_behavior.proto";
message Route {
  repeated string hosts = 1 [(google.api.field_behavior) = REQUIRED];
  map<string, int32> weights = 2;
  optional bool mirror = 3 [json_name = "mirrorTraffic"];
  oneof target {
    string host = 4;
    Route delegate = 5;
  }
  reserved 8, 10 to 12;
  reserved "legacy";
  enum Mode { UNSET = 0; ON = 1; }
  message Nested { int64 a = 1; }
}
service Routes { rpc Get(Route) returns (Route) { option (x) = { a: 1 }; } }
"#,
        );
        assert_eq!(file.imports, vec!["google/api/field_behavior.proto"]);
        let route = &file.messages[0];
        assert_eq!(route.fields.len(), 5);
        assert_eq!(route.fields[0].kind, FieldKind::Repeated);
        assert!(route.fields[0].required);
        assert_eq!(route.fields[1].kind, FieldKind::Map { key: "string".into() });
        assert_eq!(route.fields[1].type_, "int32");
        assert_eq!(route.fields[2].kind, FieldKind::Optional);
        assert_eq!(route.fields[2].json_name, "mirrorTraffic");
        assert_eq!(route.fields[3].oneof.as_deref(), Some("target"));
        assert_eq!(route.oneofs[0].fields, vec!["host", "delegate"]);
        assert_eq!(route.reserved_nums, vec![(8, 8), (10, 12)]);
        assert_eq!(route.reserved_names, vec!["legacy"]);
        assert_eq!(route.enums[0].full_name, "Route.Mode");
        assert_eq!(route.messages[0].full_name, "Route.Nested");
    }

    #[test]
    fn test_parse_errors() {
        let tokens = tokenize_schema("message A { string x = ; }").unwrap();
        let err = parse_schema(&tokens).unwrap_err();
        assert!(matches!(err, CrdError::ParseError { line: 1, column: 24, .. }), "{:?}", err);

        let tokens = tokenize_schema("message A { oneof o { repeated string x = 1; } }").unwrap();
        assert!(parse_schema(&tokens).is_err());

        let tokens = tokenize_schema("message A { string x = 1;").unwrap();
        assert!(parse_schema(&tokens).is_err());
    }
}
