use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{0}")]
    Spawn(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Run a child process to completion and capture its output.
///
/// The child is killed if `limit` elapses first.
pub async fn run_captured(mut command: Command, limit: Option<Duration>) -> Result<Output, ProcessError> {
    command.stdin(Stdio::null()).kill_on_drop(true);

    let output = command.output();
    let output = match limit {
        Some(limit) => tokio::time::timeout(limit, output)
            .await
            .map_err(|_| ProcessError::TimedOut(limit))?,
        None => output.await,
    };

    Ok(output?)
}

/// Standard output on success, standard error otherwise
pub fn stdout_or_stderr(output: &Output) -> String {
    let stream = if output.status.success() {
        &output.stdout
    } else {
        &output.stderr
    };
    String::from_utf8_lossy(stream).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_success_reports_stdout() {
        let output = run_captured(shell("echo out; echo err >&2"), None).await.unwrap();
        assert_eq!(stdout_or_stderr(&output), "out\n");
    }

    #[tokio::test]
    async fn test_failure_reports_stderr() {
        let output = run_captured(shell("echo out; echo err >&2; exit 3"), None).await.unwrap();
        assert_eq!(stdout_or_stderr(&output), "err\n");
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = run_captured(shell("sleep 5"), Some(Duration::from_millis(100))).await;
        assert!(matches!(result, Err(ProcessError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let result = run_captured(Command::new("/nonexistent/binary"), None).await;
        assert!(matches!(result, Err(ProcessError::Spawn(_))));
    }
}
