use super::process::{run_captured, stdout_or_stderr};
use crate::config::CommandConfig;
use crate::handler::{TaskHandler, TaskResult};
use async_trait::async_trait;
use std::time::Duration;
use task_worker_core::TaskPayload;
use tokio::process::Command;
use tracing::warn;

/// Characters that let one command line start another program
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$', '<', '>', '(', ')', '\n'];

/// Runs the payload as a shell command line.
///
/// This executes whatever the producer sends with the worker's privileges.
/// Deployments that do not trust every producer should disable it or set
/// an allow-list in [`CommandConfig`].
pub struct CommandHandler {
    config: CommandConfig,
}

impl CommandHandler {
    pub fn new(config: CommandConfig) -> Self {
        CommandHandler { config }
    }

    /// Reason the command line may not run, if any
    fn rejection(&self, line: &str) -> Option<String> {
        if !self.config.enabled {
            return Some("command execution is disabled on this worker".to_string());
        }
        if self.config.allowed_programs.is_empty() {
            return None;
        }

        if line.contains(SHELL_METACHARACTERS) {
            return Some("shell operators are not allowed when an allow-list is set".to_string());
        }
        let program = line.split_whitespace().next().unwrap_or_default();
        if !self.config.allowed_programs.iter().any(|allowed| allowed == program) {
            return Some(format!("'{}' is not an allowed program", program));
        }
        None
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    async fn execute(&self, payload: &TaskPayload) -> TaskResult {
        let line = payload.text();

        if let Some(reason) = self.rejection(&line) {
            warn!("Refusing command: {}", reason);
            return format!("Command failed: {}", reason);
        }

        let mut command = Command::new(&self.config.shell);
        command.arg("-c").arg(line.as_ref());

        let limit = Duration::from_secs(self.config.timeout_secs);
        match run_captured(command, Some(limit)).await {
            Ok(output) => stdout_or_stderr(&output),
            Err(e) => format!("Command failed: {}", e),
        }
    }
}
