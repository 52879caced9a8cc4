use crate::handler::{TaskHandler, TaskResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use task_worker_core::{TaskError, TaskPayload};
use thiserror::Error;

#[derive(Error, Debug)]
enum WordCountError {
    #[error(transparent)]
    Payload(#[from] TaskError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct WordCountRequest {
    url: Option<String>,
    word: Option<String>,
}

/// Counts case-insensitive occurrences of a word in a fetched page
pub struct WordCountHandler {
    client: reqwest::Client,
    timeout: Duration,
}

impl WordCountHandler {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        WordCountHandler { client, timeout }
    }

    async fn count(&self, payload: &TaskPayload) -> Result<String, WordCountError> {
        let request: WordCountRequest = payload.decode()?;
        let non_empty = |s: &String| !s.is_empty();
        let (url, word) = match (request.url.filter(non_empty), request.word.filter(non_empty)) {
            (Some(url), Some(word)) => (url, word),
            _ => return Ok("Both url and word are required".to_string()),
        };

        let body = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .text()
            .await?;

        let count = count_occurrences(&visible_text(&body), &word);
        Ok(format!("The word '{}' appears {} times at {}", word, count, url))
    }
}

#[async_trait]
impl TaskHandler for WordCountHandler {
    async fn execute(&self, payload: &TaskPayload) -> TaskResult {
        match self.count(payload).await {
            Ok(result) => result,
            Err(e) => format!("Online word count failed: {}", e),
        }
    }
}

/// Non-overlapping, case-insensitive substring matches
pub fn count_occurrences(text: &str, word: &str) -> usize {
    if word.is_empty() {
        return 0;
    }
    text.to_lowercase().matches(&word.to_lowercase()).count()
}

#[cfg(feature = "html-text")]
fn visible_text(body: &str) -> String {
    let document = scraper::Html::parse_document(body);
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

#[cfg(not(feature = "html-text"))]
fn visible_text(body: &str) -> String {
    body.to_string()
}
