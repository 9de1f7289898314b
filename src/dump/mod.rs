pub mod dates;
pub mod reader;
pub mod tokens;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use tracing::{debug, info};

use crate::constants::{ENGLISH_LANGUAGE_TAGS, ENGLISH_WIKIPEDIA, INSTANCE_OF};
pub use reader::{DecodeError, ReadOutcome, RecordReader};
pub use tokens::{JsonTokenizer, TokenSource};

/// The first value of a claim, normalised to what the pipeline compares on.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimValue {
    NoValue,
    UnknownValue,
    /// Days since 1970-01-01, Julian dates already shifted.
    Time(i64),
    Entity(String),
    Other,
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::NoValue => f.write_str("(no value)"),
            ClaimValue::UnknownValue => f.write_str("???"),
            ClaimValue::Time(day) => write!(f, "{}", day),
            ClaimValue::Entity(id) => f.write_str(id),
            ClaimValue::Other => f.write_str("{}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sitelink {
    pub title: Option<String>,
}

/// One Wikidata entity. Only the first statement of each property is kept.
#[derive(Debug, Clone, Default)]
pub struct Item {
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub descriptions: BTreeMap<String, String>,
    pub claims: BTreeMap<String, ClaimValue>,
    pub sitelinks: BTreeMap<String, Sitelink>,
}

impl Item {
    /// British or plain English label, else whichever label sorts first.
    pub fn english_name(&self) -> Option<&str> {
        english(&self.labels).or_else(|| self.labels.values().next().map(String::as_str))
    }

    pub fn english_description(&self) -> Option<&str> {
        english(&self.descriptions)
    }

    pub fn english_wikipedia_title(&self) -> Option<&str> {
        self.sitelinks.get(ENGLISH_WIKIPEDIA)?.title.as_deref()
    }

    pub fn instance_of(&self) -> Option<&str> {
        match self.claims.get(INSTANCE_OF)? {
            ClaimValue::Entity(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_instance_of(&self, types: &HashMap<String, String>) -> bool {
        self.instance_of().is_some_and(|t| types.contains_key(t))
    }
}

fn english(strings: &BTreeMap<String, String>) -> Option<&str> {
    ENGLISH_LANGUAGE_TAGS
        .iter()
        .find_map(|tag| strings.get(*tag))
        .map(String::as_str)
}

pub type DumpReader = RecordReader<JsonTokenizer<Box<dyn BufRead + Send>>>;

/// Open a dump for streaming. `.gz` files are decompressed on the fly.
pub fn open(path: &Path) -> Result<DumpReader> {
    let file = File::open(path).with_context(|| format!("Failed to open dump {:?}", path))?;
    let input: Box<dyn BufRead + Send> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::with_capacity(1 << 20, MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(1 << 20, file))
    };
    Ok(RecordReader::new(JsonTokenizer::new(input)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub parsed: u64,
    pub skipped: u64,
    pub matched: u64,
}

/// Read every entity, handing those whose `instance of` is in `types` to
/// `visit` in dump order. Everything else is dropped as soon as it is read.
pub fn scan<S: TokenSource>(
    reader: &mut RecordReader<S>,
    types: &HashMap<String, String>,
    progress_every: u64,
    mut visit: impl FnMut(Item) -> ControlFlow<()>,
) -> Result<ScanStats, DecodeError> {
    let mut stats = ScanStats::default();

    loop {
        let item = match reader.read_record()? {
            ReadOutcome::End => break,
            ReadOutcome::Skipped(reason) => {
                stats.skipped += 1;
                debug!(?reason, "Skipped entity");
                continue;
            }
            ReadOutcome::Record(item) => item,
        };

        stats.parsed += 1;
        if progress_every > 0 && stats.parsed % progress_every == 0 {
            info!(
                "Parsed {} entities ({} matched, {} MiB read)",
                stats.parsed,
                stats.matched,
                reader.offset() >> 20
            );
        }

        if !item.is_instance_of(types) {
            continue;
        }
        stats.matched += 1;
        if visit(item).is_break() {
            break;
        }
    }

    info!(
        "Parsed {} entities, skipped {}, matched {}",
        stats.parsed, stats.skipped, stats.matched
    );
    Ok(stats)
}
