use super::process::{run_captured, ProcessError};
use crate::handler::{TaskHandler, TaskResult};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use task_worker_core::TaskPayload;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
enum CrawlError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Discovers URLs with the `katana` crawler and reports how many it found.
///
/// Each run writes to its own temporary directory, removed when the run
/// ends however it ends.
pub struct CrawlHandler {
    binary: String,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl CrawlHandler {
    pub fn new(binary: &str, timeout: Duration, workdir: Option<PathBuf>) -> Self {
        CrawlHandler {
            binary: binary.to_string(),
            timeout,
            workdir,
        }
    }

    async fn crawl(&self, url: &str) -> Result<String, CrawlError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("katana-");
        let scratch = match &self.workdir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let output_path = scratch.path().join("urls.txt");

        info!("Running katana for URL: {}", url);
        let mut command = Command::new(&self.binary);
        command.arg("-u").arg(url).arg("-o").arg(&output_path);

        let output = run_captured(command, Some(self.timeout)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        info!("Katana process exit status: {}", output.status);
        debug!("Katana stdout: {}", String::from_utf8_lossy(&output.stdout));
        debug!("Katana stderr: {}", stderr);

        if !output.status.success() {
            let result = format!("Katana error: {}", stderr);
            error!("{}", result);
            return Ok(result);
        }

        // katana leaves no file when it finds nothing
        let url_count = match tokio::fs::read_to_string(&output_path).await {
            Ok(contents) => contents.lines().count(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(format!("Found {} URLs at {}", url_count, url))
    }
}

#[async_trait]
impl TaskHandler for CrawlHandler {
    async fn execute(&self, payload: &TaskPayload) -> TaskResult {
        let url = payload.text();

        match self.crawl(&url).await {
            Ok(result) => result,
            Err(e) => {
                let result = format!("Katana failed: {}", e);
                error!("{}", result);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable stand-in for katana. `$4` is the output path.
    fn fake_katana(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("katana");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn handler(binary: &str, workdir: &TempDir, timeout: Duration) -> CrawlHandler {
        CrawlHandler::new(binary, timeout, Some(workdir.path().to_path_buf()))
    }

    fn assert_empty(dir: &TempDir) {
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0, "crawl directory was not cleaned up");
    }

    #[tokio::test]
    async fn test_counts_discovered_urls() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let katana = fake_katana(&bin, r#"printf 'http://x/a\nhttp://x/b\nhttp://x/c\n' > "$4""#);

        let result = handler(&katana, &work, Duration::from_secs(10))
            .execute(&TaskPayload::from("http://x"))
            .await;

        assert_eq!(result, "Found 3 URLs at http://x");
        assert_empty(&work);
    }

    #[tokio::test]
    async fn test_missing_output_counts_zero() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let katana = fake_katana(&bin, "exit 0");

        let result = handler(&katana, &work, Duration::from_secs(10))
            .execute(&TaskPayload::from("http://x"))
            .await;

        assert_eq!(result, "Found 0 URLs at http://x");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let katana = fake_katana(&bin, "echo 'bad target' >&2; exit 2");

        let result = handler(&katana, &work, Duration::from_secs(10))
            .execute(&TaskPayload::from("http://x"))
            .await;

        assert_eq!(result, "Katana error: bad target\n");
        assert_empty(&work);
    }

    #[tokio::test]
    async fn test_timeout_and_cleanup() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let katana = fake_katana(&bin, "sleep 5");

        let result = handler(&katana, &work, Duration::from_millis(200))
            .execute(&TaskPayload::from("http://x"))
            .await;

        assert!(result.starts_with("Katana failed: timed out"), "{}", result);
        assert_empty(&work);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let work = TempDir::new().unwrap();

        let result = handler("/nonexistent/katana", &work, Duration::from_secs(1))
            .execute(&TaskPayload::from("http://x"))
            .await;

        assert!(result.starts_with("Katana failed:"), "{}", result);
        assert_empty(&work);
    }
}
