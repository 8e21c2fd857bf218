//! Parsing of model responses into [`RoutingDecision`]s.
//!
//! Models are asked for a bare mapping but routinely wrap it in code fences or
//! prose, and often answer in a Python-literal dialect (`'single quotes'`,
//! `True`/`False`/`None`). The response is reduced to the first balanced
//! mapping, parsed into a JSON value, then validated against the
//! routing-decision schema before deserializing.

use std::fmt;
use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::{Map, Number, Value};

use crate::core::types::RoutingDecision;

const ROUTING_DECISION_SCHEMA: &str = include_str!("../../schemas/routing_decision.schema.json");

static DECISION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(ROUTING_DECISION_SCHEMA)
        .expect("routing decision schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("routing decision schema should compile")
});

/// Why a model response could not be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    /// The response was empty or whitespace.
    Empty,
    /// No `{` was found in the response.
    MissingMapping,
    /// The mapping was not a well-formed literal.
    Syntax { offset: usize, message: String },
    /// The literal parsed but violates the decision schema.
    Schema(Vec<String>),
}

impl fmt::Display for DecisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionError::Empty => f.write_str("empty response"),
            DecisionError::MissingMapping => f.write_str("no mapping found in response"),
            DecisionError::Syntax { offset, message } => {
                write!(f, "malformed literal at byte {offset}: {message}")
            }
            DecisionError::Schema(errors) => {
                write!(f, "schema validation failed: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for DecisionError {}

/// Parse and validate a raw model response.
pub fn parse_decision(raw: &str) -> Result<RoutingDecision, DecisionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DecisionError::Empty);
    }
    let start = trimmed.find('{').ok_or(DecisionError::MissingMapping)?;
    let mut parser = LiteralParser::new(&trimmed[start..]);
    let value = parser.parse_value().map_err(|err| DecisionError::Syntax {
        offset: start + err.offset,
        message: err.message,
    })?;

    let errors: Vec<String> = DECISION_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(DecisionError::Schema(errors));
    }

    serde_json::from_value(value).map_err(|err| DecisionError::Schema(vec![err.to_string()]))
}

#[derive(Debug)]
struct LiteralError {
    offset: usize,
    message: String,
}

/// Recursive-descent parser for JSON and Python-style literals.
///
/// Parsing stops after the first complete value; trailing text is ignored.
struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn parse_value(&mut self) -> Result<Value, LiteralError> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_mapping(),
            Some('[') => self.parse_sequence('[', ']'),
            Some('(') => self.parse_sequence('(', ')'),
            Some('"') | Some('\'') => self.parse_string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if c.is_alphabetic() => self.parse_keyword(),
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_mapping(&mut self) -> Result<Value, LiteralError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('"') | Some('\'') => self.parse_string()?,
                _ => return Err(self.error("mapping keys must be quoted strings")),
            };
            self.skip_whitespace();
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.error("unterminated mapping")),
            }
        }
    }

    fn parse_sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(Value::Array(items));
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(items)),
                Some(c) => {
                    return Err(self.error(format!("expected ',' or '{close}', found '{c}'")));
                }
                None => return Err(self.error("unterminated sequence")),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self.bump().ok_or_else(|| self.error("dangling escape"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'a' => out.push('\u{7}'),
                        'v' => out.push('\u{b}'),
                        '0' => out.push('\0'),
                        'x' => out.push(self.parse_hex_scalar(2)?),
                        'u' => out.push(self.parse_unicode_escape()?),
                        'U' => out.push(self.parse_hex_scalar(8)?),
                        'N' => return Err(self.error("named unicode escapes are not supported")),
                        other @ ('\\' | '\'' | '"' | '/') => out.push(other),
                        '\n' => {}
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn read_hex(&mut self, digits: usize) -> Result<u32, LiteralError> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| self.error(format!("expected {digits} hex digits in escape")))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid hex escape"))?;
        self.pos = end;
        Ok(code)
    }

    fn parse_hex_scalar(&mut self, digits: usize) -> Result<char, LiteralError> {
        let code = self.read_hex(digits)?;
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode scalar"))
    }

    /// `\uXXXX`, joining a UTF-16 surrogate pair written as two escapes.
    fn parse_unicode_escape(&mut self) -> Result<char, LiteralError> {
        let high = self.read_hex(4)?;
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high).ok_or_else(|| self.error("lone low surrogate"));
        }
        if !self.src[self.pos..].starts_with("\\u") {
            return Err(self.error("high surrogate without a following low surrogate"));
        }
        self.pos += 2;
        let low = self.read_hex(4)?;
        if !(0xDC00..0xE000).contains(&low) {
            return Err(self.error("high surrogate followed by a non-surrogate escape"));
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode scalar"))
    }

    fn parse_number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos]
            .chars()
            .filter(|c| *c != '_' && *c != '+')
            .collect();
        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| LiteralError {
                offset: start,
                message: format!("invalid number '{text}'"),
            })
    }

    fn parse_keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        match &self.src[start..self.pos] {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            other => Err(LiteralError {
                offset: start,
                message: format!("unknown literal '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        let decision = parse_decision(
            r#"{"agent": "connector_agent", "action": "download a.csv", "parameters": {"bucket": "B", "filename": "a.csv"}}"#,
        )
        .expect("parse");
        assert_eq!(decision.agent, "connector_agent");
        assert_eq!(decision.action, "download a.csv");
        assert_eq!(decision.parameters.get("bucket"), Some(&json!("B")));
    }

    #[test]
    fn parses_python_literal_dialect() {
        let raw = "{'agent': 'bigquery_agent', 'action': 'create dataset', \
                   'parameters': {'dataset_id': 'emp_data', 'replace': False, 'schema': None, 'rows': (1, 2,),},}";
        let decision = parse_decision(raw).expect("parse");
        assert_eq!(decision.agent, "bigquery_agent");
        assert_eq!(decision.parameters.get("replace"), Some(&json!(false)));
        assert_eq!(decision.parameters.get("schema"), Some(&Value::Null));
        assert_eq!(decision.parameters.get("rows"), Some(&json!([1, 2])));
    }

    #[test]
    fn strips_code_fences_and_prose() {
        let raw = "Sure, here you go:\n```json\n{\"agent\": \"END\", \"action\": \"done\", \"parameters\": {}}\n```\nThanks!";
        let decision = parse_decision(raw).expect("parse");
        assert_eq!(decision.agent, "END");
    }

    #[test]
    fn missing_parameters_defaults_to_empty() {
        let decision = parse_decision(r#"{"agent": "END", "action": "done"}"#).expect("parse");
        assert!(decision.parameters.is_empty());
    }

    #[test]
    fn escapes_are_decoded() {
        let decision =
            parse_decision(r#"{"agent": "END", "action": "line\nbreak é it\'s"}"#)
                .expect("parse");
        assert_eq!(decision.action, "line\nbreak é it's");
    }

    #[test]
    fn surrogate_pair_escape_is_joined() {
        let raw = r#"{"agent": "connector_agent", "action": "upload \ud83d\ude00.csv", "parameters": {}}"#;
        let decision = parse_decision(raw).expect("parse");
        assert_eq!(decision.action, "upload \u{1F600}.csv");
        let via_serde: Value = serde_json::from_str(raw).expect("serde");
        assert_eq!(via_serde["action"], json!(decision.action));
    }

    #[test]
    fn unpaired_high_surrogate_is_rejected() {
        let err = parse_decision(r#"{"agent": "END", "action": "\ud83d done"}"#).unwrap_err();
        assert!(matches!(err, DecisionError::Syntax { .. }), "{err}");
    }

    #[test]
    fn python_hex_escapes_are_decoded() {
        let decision = parse_decision(
            r#"{'agent': 'END', 'action': 'col \x41 \U0001F600', 'parameters': {'path': 'C:\data'}}"#,
        )
        .expect("parse");
        assert_eq!(decision.action, "col A \u{1F600}");
        assert_eq!(decision.parameters.get("path"), Some(&json!("C:\\data")));
    }

    #[test]
    fn named_unicode_escape_is_rejected() {
        let err =
            parse_decision(r#"{'agent': 'END', 'action': '\N{BULLET} item'}"#).unwrap_err();
        assert!(matches!(err, DecisionError::Syntax { .. }), "{err}");
    }

    #[test]
    fn empty_response_is_rejected() {
        assert_eq!(parse_decision("   \n"), Err(DecisionError::Empty));
    }

    #[test]
    fn response_without_mapping_is_rejected() {
        assert_eq!(
            parse_decision("I think the storage agent should go next."),
            Err(DecisionError::MissingMapping)
        );
    }

    #[test]
    fn unterminated_mapping_is_a_syntax_error() {
        let err = parse_decision(r#"{"agent": "END", "action": "#).unwrap_err();
        assert!(matches!(err, DecisionError::Syntax { .. }), "{err}");
    }

    #[test]
    fn missing_agent_fails_schema() {
        let err = parse_decision(r#"{"action": "download"}"#).unwrap_err();
        assert!(matches!(err, DecisionError::Schema(_)), "{err}");
    }

    #[test]
    fn unknown_keys_fail_schema() {
        let err =
            parse_decision(r#"{"agent": "END", "action": "x", "reasoning": "because"}"#).unwrap_err();
        assert!(matches!(err, DecisionError::Schema(_)), "{err}");
    }

    #[test]
    fn non_object_parameters_fail_schema() {
        let err =
            parse_decision(r#"{"agent": "END", "action": "x", "parameters": [1]}"#).unwrap_err();
        assert!(matches!(err, DecisionError::Schema(_)), "{err}");
    }
}
