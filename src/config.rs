use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::constants::{CONFLICT_TYPES, DEFAULT_PARTICIPANTS};
use crate::downloader::RetryPolicy;
use crate::wikitext::InfoboxFilter;

const DEFAULT_CONFIG_FILE: &str = "war_timelines.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dump_path: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub endpoint: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub infobox: String,
    pub participants: Vec<String>,
    pub progress_every: u64,
    /// Replaces the built-in conflict classes when non-empty.
    pub types: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            dump_path: PathBuf::from("data/latest-all.json.gz"),
            data_dir: PathBuf::from("data"),
            db_path: PathBuf::from("data/wikitext.sqlite"),
            endpoint: "https://en.wikipedia.org/w/index.php".into(),
            user_agent: concat!("war_timelines/", env!("CARGO_PKG_VERSION")).into(),
            request_timeout_secs: 30,
            concurrency: 1,
            queue_capacity: 256,
            max_attempts: 10,
            retry_base_ms: 1000,
            retry_max_ms: 60_000,
            infobox: "Infobox".into(),
            participants: DEFAULT_PARTICIPANTS.iter().map(|p| p.to_string()).collect(),
            progress_every: 10_000,
            types: Vec::new(),
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then `WT_*` environment variables.
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("WT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("participants")
                    .with_list_parse_key("types"),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Interesting `instance of` classes, id → label.
    pub fn conflict_types(&self) -> HashMap<String, String> {
        if self.types.is_empty() {
            return CONFLICT_TYPES
                .iter()
                .map(|(id, label)| (id.to_string(), label.to_string()))
                .collect();
        }
        self.types
            .iter()
            .map(|id| {
                let label = crate::constants::conflict_label(id).unwrap_or(id.as_str());
                (id.clone(), label.to_string())
            })
            .collect()
    }

    pub fn infobox_filter(&self) -> InfoboxFilter {
        InfoboxFilter {
            name: self.infobox.clone(),
            participants: self.participants.clone(),
        }
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}
