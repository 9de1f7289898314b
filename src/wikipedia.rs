use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::trace;

use crate::downloader::{FetchError, MarkupFetcher};

/// Raw wikitext over `index.php?action=raw`.
pub struct WikipediaClient {
    client: reqwest::Client,
    endpoint: String,
}

impl WikipediaClient {
    pub fn new(endpoint: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(WikipediaClient {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl MarkupFetcher for WikipediaClient {
    async fn fetch(&self, title: &str) -> Result<String, FetchError> {
        let transport = |source| FetchError::Transport {
            title: title.to_string(),
            source,
        };

        trace!("GET {} {:?}", self.endpoint, title);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("action", "raw"), ("title", title)])
            .send()
            .await
            .map_err(transport)?;

        check_status(title, response.status())?;
        // Successful bodies go to the classifier, error pages included.
        response.text().await.map_err(transport)
    }
}

/// Non-success statuses fail the fetch. Whether the job retries is up to
/// [`FetchError::is_transient`], so a missing article (404) is rejected at
/// once while 429 and 5xx back off.
fn check_status(title: &str, status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }
    Err(FetchError::Status {
        title: title.to_string(),
        status: status.as_u16(),
    })
}
