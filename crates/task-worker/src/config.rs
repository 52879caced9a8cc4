use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use task_worker_core::DEFAULT_QUEUE_NAME;
use task_worker_persistence::ResultStoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Consumer tag prefix; generated when unset
    pub worker_id: Option<String>,
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    pub handlers: HandlerConfig,
    /// Fixed delay between broker reconnect attempts
    pub reconnect_delay_secs: u64,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,
    pub queue: String,
    pub prefetch_count: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub ping_binary: String,
    /// Passed to ping as its per-reply wait
    pub ping_timeout_secs: u64,
    pub dns_timeout_secs: u64,
    pub crawl_binary: String,
    pub crawl_timeout_secs: u64,
    /// Parent of the per-task crawl directories; system temp dir when unset
    pub crawl_workdir: Option<PathBuf>,
    /// Applies to both `http_get` and `online_word_count`
    pub http_timeout_secs: u64,
    pub command: CommandConfig,
}

/// Gate for the `command` task type.
///
/// Commands run through `sh -c` with the worker's privileges. Disable it, or
/// restrict it with `allowed_programs`, unless every producer on the queue is
/// trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub enabled: bool,
    /// Allowed first words of the command line; empty allows anything
    pub allowed_programs: Vec<String>,
    pub shell: String,
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: None,
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
            handlers: HandlerConfig::default(),
            reconnect_delay_secs: 5,
            metrics_port: None,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            host: "rabbitmq".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            queue: DEFAULT_QUEUE_NAME.to_string(),
            prefetch_count: 1,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let store = ResultStoreConfig::default();
        DatabaseConfig {
            host: store.host,
            port: store.port,
            name: store.database,
            user: store.user,
            password: store.password,
            max_connections: store.max_connections,
            acquire_timeout_secs: store.acquire_timeout_secs,
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            ping_binary: "ping".to_string(),
            ping_timeout_secs: 3,
            dns_timeout_secs: 10,
            crawl_binary: "katana".to_string(),
            crawl_timeout_secs: 300,
            crawl_workdir: None,
            http_timeout_secs: 10,
            command: CommandConfig::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        CommandConfig {
            enabled: true,
            allowed_programs: Vec::new(),
            shell: "sh".to_string(),
            timeout_secs: 300,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn to_result_store_config(&self) -> ResultStoreConfig {
        ResultStoreConfig {
            host: self.database.host.clone(),
            port: self.database.port,
            database: self.database.name.clone(),
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            max_connections: self.database.max_connections,
            acquire_timeout_secs: self.database.acquire_timeout_secs,
        }
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }
}
