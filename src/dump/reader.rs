use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{trace, warn};

use super::dates::{self, DateError, TimeClaim};
use super::tokens::{Scalar, Token, TokenError, TokenSource};
use super::{ClaimValue, Item, Sitelink};

/// The dump no longer matches the grammar this reader was written for.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("expected {expected} at {path}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
        path: String,
    },
    #[error("input ended inside {path}")]
    UnexpectedEnd { path: String },
    #[error("missing field '{field}' at {path}")]
    MissingField { field: &'static str, path: String },
    #[error("unknown snaktype {found:?} at {path}")]
    UnknownSnakType { found: Option<String>, path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A property definition (`P…`) rather than an item.
    Property,
    /// Any other entity type, e.g. a lexeme.
    OtherType(String),
}

#[derive(Debug)]
pub enum ReadOutcome {
    Record(Item),
    Skipped(SkipReason),
    End,
}

/// Where in the current entity the reader is, for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct DecodePath {
    segments: Vec<String>,
}

impl DecodePath {
    fn push(&mut self, segment: &str) {
        self.segments.push(segment.to_string());
    }

    fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl std::fmt::Display for DecodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str(":");
        }
        for segment in &self.segments {
            write!(f, ":{}", segment)?;
        }
        Ok(())
    }
}

/// Decodes one entity per call from a token stream positioned at the
/// top-level array of a Wikidata JSON dump.
pub struct RecordReader<S> {
    source: S,
    path: DecodePath,
    started: bool,
    finished: bool,
}

impl<S: TokenSource> RecordReader<S> {
    pub fn new(source: S) -> Self {
        RecordReader {
            source,
            path: DecodePath::default(),
            started: false,
            finished: false,
        }
    }

    /// Input bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.source.offset()
    }

    pub fn read_record(&mut self) -> Result<ReadOutcome, DecodeError> {
        if self.finished {
            return Ok(ReadOutcome::End);
        }
        if !self.started {
            self.expect(Token::StartArray, "start of entity array")?;
            self.started = true;
        }

        match self.next()? {
            Token::EndArray => {
                self.finished = true;
                return Ok(ReadOutcome::End);
            }
            Token::StartObject => {}
            other => return Err(self.unexpected("entity object", &other)),
        }

        let mut item = Item::default();
        loop {
            let field = match self.next()? {
                Token::EndObject => return Ok(ReadOutcome::Record(item)),
                Token::FieldName(field) => field,
                other => return Err(self.unexpected("field name or end of entity", &other)),
            };

            self.path.push(&field);
            match field.as_str() {
                "type" => {
                    let kind = self.expect_string()?;
                    if kind != "item" {
                        self.path.pop();
                        self.skip_container()?;
                        if kind == "property" {
                            return Ok(ReadOutcome::Skipped(SkipReason::Property));
                        }
                        warn!(kind = %kind, "Expected 'item' entity, skipping");
                        return Ok(ReadOutcome::Skipped(SkipReason::OtherType(kind)));
                    }
                }
                "id" => item.id = self.expect_string()?,
                "labels" => item.labels = self.read_language_strings()?,
                "descriptions" => item.descriptions = self.read_language_strings()?,
                "claims" => item.claims = self.read_claims()?,
                "sitelinks" => item.sitelinks = self.read_sitelinks()?,
                _ => {
                    trace!(path = %self.path, "Skipping");
                    self.skip_value()?;
                }
            }
            self.path.pop();
        }
    }

    fn next(&mut self) -> Result<Token, DecodeError> {
        match self.source.next_token()? {
            Some(token) => {
                trace!(path = %self.path, depth = self.path.depth(), %token);
                Ok(token)
            }
            None => Err(DecodeError::UnexpectedEnd {
                path: self.path.to_string(),
            }),
        }
    }

    fn unexpected(&self, expected: &'static str, found: &Token) -> DecodeError {
        DecodeError::Unexpected {
            expected,
            found: found.to_string(),
            path: self.path.to_string(),
        }
    }

    fn missing(&self, field: &'static str) -> DecodeError {
        DecodeError::MissingField {
            field,
            path: self.path.to_string(),
        }
    }

    fn expect(&mut self, wanted: Token, expected: &'static str) -> Result<(), DecodeError> {
        let token = self.next()?;
        if token == wanted {
            Ok(())
        } else {
            Err(self.unexpected(expected, &token))
        }
    }

    fn expect_string(&mut self) -> Result<String, DecodeError> {
        match self.next()? {
            Token::Scalar(Scalar::String(s)) => Ok(s),
            other => Err(self.unexpected("string", &other)),
        }
    }

    /// Consume a whole value without building anything from it.
    fn skip_value(&mut self) -> Result<(), DecodeError> {
        match self.next()? {
            Token::StartObject | Token::StartArray => self.skip_container(),
            Token::Scalar(_) => Ok(()),
            other => Err(self.unexpected("value", &other)),
        }
    }

    /// Consume tokens up to and including the close of the innermost open
    /// object or array.
    fn skip_container(&mut self) -> Result<(), DecodeError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()? {
                Token::StartObject | Token::StartArray => depth += 1,
                Token::EndObject | Token::EndArray => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    // {"en": {"language": "en", "value": "Battle of Waterloo"}, ...}
    fn read_language_strings(&mut self) -> Result<BTreeMap<String, String>, DecodeError> {
        self.expect(Token::StartObject, "language map")?;
        let mut strings = BTreeMap::new();

        loop {
            let tag = match self.next()? {
                Token::EndObject => break,
                Token::FieldName(tag) => tag,
                other => return Err(self.unexpected("language tag", &other)),
            };

            self.path.push(&tag);
            self.expect(Token::StartObject, "language string object")?;
            let mut value = None;
            loop {
                match self.next()? {
                    Token::EndObject => break,
                    Token::FieldName(f) if f == "value" => value = Some(self.expect_string()?),
                    Token::FieldName(_) => self.skip_value()?,
                    other => return Err(self.unexpected("language string field", &other)),
                }
            }
            let value = value.ok_or_else(|| self.missing("value"))?;
            self.path.pop();
            strings.insert(tag, value);
        }

        Ok(strings)
    }

    // {"P31": [{"mainsnak": {...}, "type": "statement", "id": "...", ...}, ...], ...}
    fn read_claims(&mut self) -> Result<BTreeMap<String, ClaimValue>, DecodeError> {
        self.expect(Token::StartObject, "claims map")?;
        let mut claims = BTreeMap::new();

        loop {
            let property = match self.next()? {
                Token::EndObject => break,
                Token::FieldName(property) => property,
                other => return Err(self.unexpected("property id", &other)),
            };

            self.path.push(&property);
            self.expect(Token::StartArray, "statement list")?;
            match self.next()? {
                Token::EndArray => {
                    self.path.pop();
                    continue;
                }
                Token::StartObject => {}
                other => return Err(self.unexpected("statement object", &other)),
            }

            let value = loop {
                match self.next()? {
                    Token::FieldName(f) if f == "mainsnak" => {
                        self.path.push("mainsnak");
                        let snak = self.read_value()?;
                        let value = self.decode_snak(&snak)?;
                        self.path.pop();
                        break value;
                    }
                    Token::FieldName(_) => self.skip_value()?,
                    Token::EndObject => return Err(self.missing("mainsnak")),
                    other => return Err(self.unexpected("statement field", &other)),
                }
            };

            // Rest of the first statement, then every later statement.
            self.skip_container()?;
            self.skip_container()?;
            self.path.pop();

            if let Some(value) = value {
                claims.entry(property).or_insert(value);
            }
        }

        Ok(claims)
    }

    // {"enwiki": {"site": "enwiki", "title": "Battle of Waterloo", "badges": []}, ...}
    fn read_sitelinks(&mut self) -> Result<BTreeMap<String, Sitelink>, DecodeError> {
        self.expect(Token::StartObject, "sitelinks map")?;
        let mut sitelinks = BTreeMap::new();

        loop {
            let site = match self.next()? {
                Token::EndObject => break,
                Token::FieldName(site) => site,
                other => return Err(self.unexpected("site key", &other)),
            };

            self.path.push(&site);
            self.expect(Token::StartObject, "sitelink object")?;
            let mut link = Sitelink::default();
            loop {
                match self.next()? {
                    Token::EndObject => break,
                    Token::FieldName(f) if f == "title" => link.title = Some(self.expect_string()?),
                    Token::FieldName(_) => self.skip_value()?,
                    other => return Err(self.unexpected("sitelink field", &other)),
                }
            }
            self.path.pop();
            sitelinks.insert(site, link);
        }

        Ok(sitelinks)
    }

    /// Build a JSON value from the next value in the stream. Only used for
    /// snaks, which are small.
    fn read_value(&mut self) -> Result<Value, DecodeError> {
        let token = self.next()?;
        self.value_from(token)
    }

    fn value_from(&mut self, token: Token) -> Result<Value, DecodeError> {
        match token {
            Token::StartObject => {
                let mut map = Map::new();
                loop {
                    match self.next()? {
                        Token::EndObject => return Ok(Value::Object(map)),
                        Token::FieldName(key) => {
                            let value = self.read_value()?;
                            map.insert(key, value);
                        }
                        other => return Err(self.unexpected("field name", &other)),
                    }
                }
            }
            Token::StartArray => {
                let mut items = Vec::new();
                loop {
                    match self.next()? {
                        Token::EndArray => return Ok(Value::Array(items)),
                        other => items.push(self.value_from(other)?),
                    }
                }
            }
            Token::Scalar(Scalar::String(s)) => Ok(Value::String(s)),
            Token::Scalar(Scalar::Number(raw)) => match raw.parse::<Number>() {
                Ok(n) => Ok(Value::Number(n)),
                Err(_) => Ok(Value::String(raw)),
            },
            Token::Scalar(Scalar::Bool(b)) => Ok(Value::Bool(b)),
            Token::Scalar(Scalar::Null) => Ok(Value::Null),
            other => Err(self.unexpected("value", &other)),
        }
    }

    /// `None` means the claim carries a date that cannot be pinned to a day.
    fn decode_snak(&self, snak: &Value) -> Result<Option<ClaimValue>, DecodeError> {
        match snak.get("snaktype").and_then(Value::as_str) {
            Some("novalue") => Ok(Some(ClaimValue::NoValue)),
            Some("somevalue") => Ok(Some(ClaimValue::UnknownValue)),
            Some("value") => {
                let datavalue = snak.get("datavalue").ok_or_else(|| self.missing("datavalue"))?;
                let value = datavalue.get("value");
                match datavalue.get("type").and_then(Value::as_str) {
                    Some("time") => {
                        let value = value.ok_or_else(|| self.missing("value"))?;
                        let time = value
                            .get("time")
                            .and_then(Value::as_str)
                            .ok_or_else(|| self.missing("time"))?;
                        let precision = value
                            .get("precision")
                            .map(scalar_text)
                            .ok_or_else(|| self.missing("precision"))?;
                        let calendar_model = value.get("calendarmodel").and_then(Value::as_str);
                        let claim = TimeClaim {
                            time,
                            precision: &precision,
                            calendar_model: calendar_model.unwrap_or_default(),
                        };
                        Ok(dates::epoch_day(&claim)?.map(ClaimValue::Time))
                    }
                    Some("wikibase-entityid") => Ok(Some(
                        value
                            .and_then(entity_id)
                            .map(ClaimValue::Entity)
                            .unwrap_or(ClaimValue::Other),
                    )),
                    _ => Ok(Some(ClaimValue::Other)),
                }
            }
            other => Err(DecodeError::UnknownSnakType {
                found: other.map(str::to_string),
                path: self.path.to_string(),
            }),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Older dumps carry only `numeric-id` and `entity-type`.
fn entity_id(value: &Value) -> Option<String> {
    if let Some(id) = value.get("id").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    let numeric = value.get("numeric-id").and_then(Value::as_u64)?;
    match value.get("entity-type").and_then(Value::as_str) {
        Some("item") => Some(format!("Q{}", numeric)),
        Some("property") => Some(format!("P{}", numeric)),
        _ => None,
    }
}
