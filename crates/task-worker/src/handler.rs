use crate::config::HandlerConfig;
use crate::handlers::{
    CommandHandler, CrawlHandler, DnsLookupHandler, HttpGetHandler, PingHandler, WordCountHandler,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use task_worker_core::{TaskPayload, TaskType};

/// Result text produced by a handler.
///
/// Operational failures (process launch errors, timeouts, network errors)
/// are reported inside the text, prefixed with the operation name.
pub type TaskResult = String;

/// Trait for task handlers
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task with the given payload
    async fn execute(&self, payload: &TaskPayload) -> TaskResult;
}

/// Registry of task handlers by task type
pub struct TaskHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        TaskHandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the six built-in task types
    pub fn builtin(config: &HandlerConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("task-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let http_timeout = Duration::from_secs(config.http_timeout_secs);

        let mut registry = Self::new();
        registry.register(
            TaskType::Ping.as_str(),
            PingHandler::new(&config.ping_binary, config.ping_timeout_secs),
        );
        registry.register(
            TaskType::DnsLookup.as_str(),
            DnsLookupHandler::new(Duration::from_secs(config.dns_timeout_secs)),
        );
        registry.register(
            TaskType::Katana.as_str(),
            CrawlHandler::new(
                &config.crawl_binary,
                Duration::from_secs(config.crawl_timeout_secs),
                config.crawl_workdir.clone(),
            ),
        );
        registry.register(
            TaskType::OnlineWordCount.as_str(),
            WordCountHandler::new(client.clone(), http_timeout),
        );
        registry.register(
            TaskType::Command.as_str(),
            CommandHandler::new(config.command.clone()),
        );
        registry.register(
            TaskType::HttpGet.as_str(),
            HttpGetHandler::new(client, http_timeout),
        );

        Ok(registry)
    }

    /// Register a task handler for a specific task type
    pub fn register<H: TaskHandler + 'static>(&mut self, task_type: impl Into<String>, handler: H) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    /// Look up the handler for a task type tag
    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Check if a handler is registered for a task type
    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Get all registered task types, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
