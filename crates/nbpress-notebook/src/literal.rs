//! Restricted parser for Python-style literals.
//!
//! Accepts the subset needed for settings blocks: dicts, lists, tuples,
//! strings (single, double and triple quoted, with `r`/`u` prefixes and
//! implicit concatenation), integers, floats, `True`, `False` and `None`.
//! Names, calls and operators other than a leading sign are rejected, so
//! nothing in a notebook is ever evaluated.

use serde_json::{Map, Number, Value};

/// Error produced while parsing a literal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    /// Byte offset into the parsed text
    pub offset: usize,
    /// What went wrong
    pub message: String,
}

/// Parse a single literal value spanning the whole input.
pub fn parse_literal(source: &str) -> Result<Value, LiteralError> {
    let mut parser = LiteralParser::new(source);
    let value = parser.value()?;
    parser.skip_trivia();
    if parser.pos < source.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

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

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Skip whitespace, newlines, `#` comments and line continuations.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('\\') if self.rest()[1..].starts_with('\n') => {
                    self.pos += 2;
                }
                _ => return,
            }
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        self.skip_trivia();
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => self.sequence('[', ']').map(Value::Array),
            Some('(') => self.parenthesized(),
            Some(c) if c == '"' || c == '\'' || self.at_string_prefix() => self.strings(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self) -> Result<Value, LiteralError> {
        self.eat('{');
        let mut map = Map::new();

        loop {
            self.skip_trivia();
            if self.eat('}') {
                return Ok(Value::Object(map));
            }

            let key_offset = self.pos;
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => {
                    return Err(LiteralError {
                        offset: key_offset,
                        message: "dictionary keys must be strings or numbers".to_string(),
                    })
                }
            };

            self.skip_trivia();
            if !self.eat(':') {
                return Err(self.error("expected ':' after dictionary key"));
            }

            let value = self.value()?;
            map.insert(key, value);

            self.skip_trivia();
            if self.eat(',') {
                continue;
            }
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            return Err(self.error("expected ',' or '}' in dictionary"));
        }
    }

    /// Comma separated items between `open` and `close`.
    ///
    /// Returns the items and whether a trailing comma was present.
    fn items(&mut self, open: char, close: char) -> Result<(Vec<Value>, bool), LiteralError> {
        self.eat(open);
        let mut items = Vec::new();
        let mut trailing_comma = false;

        loop {
            self.skip_trivia();
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }

            items.push(self.value()?);
            trailing_comma = false;

            self.skip_trivia();
            if self.eat(',') {
                trailing_comma = true;
                continue;
            }
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            return Err(self.error(format!("expected ',' or '{}'", close)));
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Vec<Value>, LiteralError> {
        self.items(open, close).map(|(items, _)| items)
    }

    /// `(x)` is a grouped value; `()`, `(x,)` and `(x, y)` are tuples.
    fn parenthesized(&mut self) -> Result<Value, LiteralError> {
        let (mut items, trailing_comma) = self.items('(', ')')?;
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(Value::Array(items))
    }

    fn at_string_prefix(&self) -> bool {
        let rest = self.rest();
        let prefix_len = rest
            .chars()
            .take_while(|c| matches!(c, 'r' | 'R' | 'u' | 'U'))
            .count();
        (1..=2).contains(&prefix_len)
            && matches!(rest[prefix_len..].chars().next(), Some('"' | '\''))
    }

    /// One or more adjacent string literals, concatenated.
    fn strings(&mut self) -> Result<Value, LiteralError> {
        let mut out = self.string()?;
        loop {
            let save = self.pos;
            self.skip_trivia();
            match self.peek() {
                Some('"' | '\'') => out.push_str(&self.string()?),
                Some(_) if self.at_string_prefix() => out.push_str(&self.string()?),
                _ => {
                    self.pos = save;
                    return Ok(Value::String(out));
                }
            }
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let mut raw = false;
        while let Some(c @ ('r' | 'R' | 'u' | 'U')) = self.peek() {
            raw |= matches!(c, 'r' | 'R');
            self.bump();
        }

        let start = self.pos;
        let Some(quote) = self.bump() else {
            return Err(self.error("expected string"));
        };
        let triple = self.rest().starts_with(&format!("{0}{0}", quote));
        if triple {
            self.pos += 2;
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                self.pos = start;
                return Err(self.error("unterminated string"));
            };

            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.rest().starts_with(&format!("{0}{0}", quote)) {
                    self.pos += 2;
                    return Ok(out);
                }
                out.push(c);
                continue;
            }

            if c == '\n' && !triple {
                self.pos = start;
                return Err(self.error("newline in single-quoted string"));
            }

            if c == '\\' {
                if raw {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                    continue;
                }
                self.escape(&mut out)?;
                continue;
            }

            out.push(c);
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), LiteralError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape"));
        };
        match c {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' | '\'' | '"' => out.push(c),
            'x' => out.push(self.hex_escape(2)?),
            'u' => out.push(self.hex_escape(4)?),
            'U' => out.push(self.hex_escape(8)?),
            other => {
                // Unknown escapes are kept verbatim.
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, LiteralError> {
        let rest = self.rest();
        let hex = rest
            .get(..digits)
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| self.error("invalid hex escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid hex escape"))?;
        let c = char::from_u32(code).ok_or_else(|| self.error("invalid code point"))?;
        self.pos += digits;
        Ok(c)
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        let negative = if self.eat('-') {
            true
        } else {
            self.eat('+');
            false
        };
        self.skip_trivia();

        let body_start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                self.bump();
            } else if matches!(c, '+' | '-')
                && matches!(self.src[..self.pos].chars().last(), Some('e' | 'E'))
                && !self.src[body_start..self.pos].starts_with("0x")
            {
                self.bump();
            } else {
                break;
            }
        }

        let body: String = self.src[body_start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        let invalid = || LiteralError {
            offset: start,
            message: format!("invalid number '{}'", &self.src[start..self.pos]),
        };

        if body.is_empty() {
            return Err(invalid());
        }

        let int = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
            Some(i64::from_str_radix(hex, 16).map_err(|_| invalid())?)
        } else if body.chars().all(|c| c.is_ascii_digit()) {
            Some(body.parse::<i64>().map_err(|_| invalid())?)
        } else {
            None
        };

        if let Some(int) = int {
            return Ok(Value::Number(Number::from(if negative { -int } else { int })));
        }

        let float: f64 = body.parse().map_err(|_| invalid())?;
        let float = if negative { -float } else { float };
        Number::from_f64(float).map(Value::Number).ok_or_else(invalid)
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        match &self.src[start..self.pos] {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            name => Err(LiteralError {
                offset: start,
                message: format!("'{}' is not a literal", name),
            }),
        }
    }
}
