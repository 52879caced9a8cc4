use super::process::{run_captured, stdout_or_stderr};
use crate::handler::{TaskHandler, TaskResult};
use async_trait::async_trait;
use task_worker_core::TaskPayload;
use tokio::process::Command;

/// Sends a single ICMP echo through the system `ping` binary
pub struct PingHandler {
    binary: String,
    wait_secs: u64,
}

impl PingHandler {
    pub fn new(binary: &str, wait_secs: u64) -> Self {
        PingHandler {
            binary: binary.to_string(),
            wait_secs,
        }
    }
}

#[async_trait]
impl TaskHandler for PingHandler {
    async fn execute(&self, payload: &TaskPayload) -> TaskResult {
        let target = payload.text();

        let mut command = Command::new(&self.binary);
        command
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(self.wait_secs.to_string())
            .arg(target.as_ref());

        // -W bounds the wait for the reply
        match run_captured(command, None).await {
            Ok(output) => stdout_or_stderr(&output),
            Err(e) => format!("Ping failed: {}", e),
        }
    }
}
