use crate::handler::{TaskHandler, TaskResult};
use async_trait::async_trait;
use std::time::Duration;
use task_worker_core::TaskPayload;

/// Maximum number of characters of the body kept as the result
pub const MAX_RESULT_CHARS: usize = 1000;

/// Fetches a URL and keeps the start of the body
pub struct HttpGetHandler {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGetHandler {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        HttpGetHandler { client, timeout }
    }

    async fn fetch(&self, url: &str) -> reqwest::Result<String> {
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .text()
            .await
    }
}

#[async_trait]
impl TaskHandler for HttpGetHandler {
    async fn execute(&self, payload: &TaskPayload) -> TaskResult {
        let url = payload.text();

        // Status codes are not checked: error pages are results too
        match self.fetch(&url).await {
            Ok(body) => body.chars().take(MAX_RESULT_CHARS).collect(),
            Err(e) => format!("HTTP GET failed: {}", e),
        }
    }
}
