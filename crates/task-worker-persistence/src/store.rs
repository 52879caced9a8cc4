use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use task_worker_core::{TaskId, TaskOutcome};
use tracing::{debug, info, warn};

const UPDATE_TASK_SQL: &str = "UPDATE tasks SET status = $1, result = $2 WHERE task_id = $3";

/// Result of a single persist call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    pub rows_affected: u64,
}

impl PersistOutcome {
    /// The write committed but matched no row. The frontend creates rows
    /// before publishing, so this points at a stale or foreign message.
    pub fn is_missing_row(&self) -> bool {
        self.rows_affected == 0
    }
}

/// Persistence of a task's terminal state.
///
/// Implementations update a pre-existing row and never insert. A returned
/// `Ok` means the write is durable.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn persist(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<PersistOutcome>;
}

/// Connection settings for the PostgreSQL store
#[derive(Debug, Clone)]
pub struct ResultStoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        ResultStoreConfig {
            host: "db".to_string(),
            port: 5432,
            database: "task_queue_db".to_string(),
            user: "user".to_string(),
            password: "user".to_string(),
            max_connections: 2,
            acquire_timeout_secs: 10,
        }
    }
}

impl ResultStoreConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// PostgreSQL-backed result store
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        PgResultStore { pool }
    }

    /// Build a pool that connects on first use.
    ///
    /// Startup never blocks on the database; an unreachable store shows up
    /// as a persist error and the message is requeued.
    pub fn connect_lazy(config: &ResultStoreConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_lazy_with(config.connect_options());

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Configured task result store"
        );

        PgResultStore { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    #[tracing::instrument(skip(self, outcome), fields(task_id = %task_id, db.table = "tasks", db.operation = "update"))]
    async fn persist(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<PersistOutcome> {
        let mut tx = self.pool.begin().await?;

        let query = sqlx::query(UPDATE_TASK_SQL)
            .bind(outcome.status.as_str())
            .bind(outcome.result.as_deref());
        let query = match task_id {
            TaskId::Int(id) => query.bind(*id),
            TaskId::Text(id) => query.bind(id.as_str()),
        };

        let rows_affected = query.execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        let persisted = PersistOutcome { rows_affected };
        if persisted.is_missing_row() {
            warn!("No task row matched task_id={}", task_id);
        } else {
            debug!("Updated {} row(s) for task_id={}", rows_affected, task_id);
        }

        Ok(persisted)
    }
}
