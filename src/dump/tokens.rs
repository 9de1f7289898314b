use std::fmt;
use std::io::BufRead;

use thiserror::Error;

/// A scalar JSON value. Numbers keep their raw text so precision codes and
/// large ids survive untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Number(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName(String),
    Scalar(Scalar),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::StartObject => f.write_str("{"),
            Token::EndObject => f.write_str("}"),
            Token::StartArray => f.write_str("["),
            Token::EndArray => f.write_str("]"),
            Token::FieldName(name) => write!(f, "field \"{}\"", name),
            Token::Scalar(Scalar::String(s)) => write!(f, "string \"{}\"", s),
            Token::Scalar(Scalar::Number(n)) => write!(f, "number {}", n),
            Token::Scalar(Scalar::Bool(b)) => write!(f, "{}", b),
            Token::Scalar(Scalar::Null) => f.write_str("null"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read dump: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON at byte {offset}: {message}")]
    Syntax { offset: u64, message: String },
}

/// Anything that yields a strictly nested sequence of JSON tokens.
/// `Ok(None)` marks the end of the input.
pub trait TokenSource {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError>;

    /// Bytes consumed so far.
    fn offset(&self) -> u64;
}

enum Frame {
    Object { expect_key: bool },
    Array,
}

/// Pull tokenizer over a buffered byte stream. Holds at most one token's
/// bytes at a time, so a multi-gigabyte dump streams in constant memory.
pub struct JsonTokenizer<R> {
    reader: R,
    stack: Vec<Frame>,
    offset: u64,
    scratch: Vec<u8>,
}

impl<R: BufRead> JsonTokenizer<R> {
    pub fn new(reader: R) -> Self {
        JsonTokenizer {
            reader,
            stack: Vec::new(),
            offset: 0,
            scratch: Vec::with_capacity(256),
        }
    }

    fn syntax(&self, message: impl Into<String>) -> TokenError {
        TokenError::Syntax {
            offset: self.offset,
            message: message.into(),
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, TokenError> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    // Commas and colons carry no information once nesting is tracked.
    fn skip_separators(&mut self) -> Result<Option<u8>, TokenError> {
        loop {
            match self.peek()? {
                Some(b) if b.is_ascii_whitespace() || b == b',' || b == b':' => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn value_done(&mut self) {
        if let Some(Frame::Object { expect_key }) = self.stack.last_mut() {
            *expect_key = true;
        }
    }

    fn expecting_key(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Object { expect_key: true }))
    }

    fn read_string(&mut self) -> Result<String, TokenError> {
        self.scratch.clear();
        self.scratch.push(b'"');
        self.bump();

        let mut escaped = false;
        let mut has_escape = false;
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Err(self.syntax("unterminated string"));
            }
            let mut used = 0;
            let mut done = false;
            for &b in buf {
                used += 1;
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                    has_escape = true;
                } else if b == b'"' {
                    done = true;
                    break;
                }
            }
            self.scratch.extend_from_slice(&buf[..used]);
            self.reader.consume(used);
            self.offset += used as u64;
            if done {
                break;
            }
        }

        if has_escape {
            serde_json::from_slice::<String>(&self.scratch)
                .map_err(|e| self.syntax(format!("bad string escape: {}", e)))
        } else {
            let inner = &self.scratch[1..self.scratch.len() - 1];
            String::from_utf8(inner.to_vec()).map_err(|_| self.syntax("string is not UTF-8"))
        }
    }

    fn read_while(&mut self, accept: fn(u8) -> bool) -> Result<String, TokenError> {
        self.scratch.clear();
        while let Some(b) = self.peek()? {
            if !accept(b) {
                break;
            }
            self.scratch.push(b);
            self.bump();
        }
        // accept() only admits ASCII
        Ok(String::from_utf8_lossy(&self.scratch).into_owned())
    }

    fn close(&mut self, object: bool) -> Result<Token, TokenError> {
        self.bump();
        match (self.stack.pop(), object) {
            (Some(Frame::Object { .. }), true) => {
                self.value_done();
                Ok(Token::EndObject)
            }
            (Some(Frame::Array), false) => {
                self.value_done();
                Ok(Token::EndArray)
            }
            _ => Err(self.syntax(if object { "unbalanced '}'" } else { "unbalanced ']'" })),
        }
    }
}

impl<R: BufRead> TokenSource for JsonTokenizer<R> {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        let Some(b) = self.skip_separators()? else {
            if self.stack.is_empty() {
                return Ok(None);
            }
            return Err(self.syntax("unexpected end of input"));
        };

        if self.expecting_key() && b != b'"' && b != b'}' {
            return Err(self.syntax(format!("expected field name, found '{}'", b as char)));
        }

        let token = match b {
            b'{' => {
                self.bump();
                self.stack.push(Frame::Object { expect_key: true });
                Token::StartObject
            }
            b'[' => {
                self.bump();
                self.stack.push(Frame::Array);
                Token::StartArray
            }
            b'}' => self.close(true)?,
            b']' => self.close(false)?,
            b'"' => {
                let key = self.expecting_key();
                let text = self.read_string()?;
                if key {
                    if let Some(Frame::Object { expect_key }) = self.stack.last_mut() {
                        *expect_key = false;
                    }
                    Token::FieldName(text)
                } else {
                    self.value_done();
                    Token::Scalar(Scalar::String(text))
                }
            }
            b'-' | b'0'..=b'9' => {
                let raw = self.read_while(|c| {
                    c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E')
                })?;
                self.value_done();
                Token::Scalar(Scalar::Number(raw))
            }
            b't' | b'f' | b'n' => {
                let word = self.read_while(|c| c.is_ascii_alphabetic())?;
                let scalar = match word.as_str() {
                    "true" => Scalar::Bool(true),
                    "false" => Scalar::Bool(false),
                    "null" => Scalar::Null,
                    _ => return Err(self.syntax(format!("unknown literal '{}'", word))),
                };
                self.value_done();
                Token::Scalar(scalar)
            }
            other => return Err(self.syntax(format!("unexpected byte '{}'", other as char))),
        };

        Ok(Some(token))
    }
}
