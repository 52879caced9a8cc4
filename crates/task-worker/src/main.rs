use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use std::sync::Arc;
use task_worker::{
    AmqpConnector, ConsumerLoop, Dispatcher, TaskHandlerRegistry, WorkerConfig, WorkerMetrics,
};
use task_worker_persistence::PgResultStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "task-worker")]
#[command(about = "Queue-driven task executor", long_about = None)]
struct Args {
    /// RabbitMQ host
    #[arg(long, env = "RABBITMQ_HOST")]
    rabbitmq_host: Option<String>,

    /// PostgreSQL host
    #[arg(long, env = "DB_HOST")]
    db_host: Option<String>,

    /// PostgreSQL database name
    #[arg(long, env = "DB_NAME")]
    db_name: Option<String>,

    #[arg(long, env = "DB_USER")]
    db_user: Option<String>,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    fn apply(self, config: &mut WorkerConfig) {
        if let Some(host) = self.rabbitmq_host {
            config.broker.host = host;
        }
        if let Some(host) = self.db_host {
            config.database.host = host;
        }
        if let Some(name) = self.db_name {
            config.database.name = name;
        }
        if let Some(user) = self.db_user {
            config.database.user = user;
        }
        if let Some(password) = self.db_password {
            config.database.password = password;
        }
        if let Some(worker_id) = self.worker_id {
            config.worker_id = Some(worker_id);
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };
    args.apply(&mut config);

    let worker_id = config.generate_worker_id();
    tracing::info!(
        "Starting worker {} (broker: {}:{}, database: {}@{}/{})",
        worker_id,
        config.broker.host,
        config.broker.port,
        config.database.user,
        config.database.host,
        config.database.name
    );

    let registry = TaskHandlerRegistry::builtin(&config.handlers)?;
    tracing::info!("Registered task types: {:?}", registry.task_types());
    if !config.handlers.command.enabled {
        tracing::info!("Command execution is disabled");
    }

    // The pool connects on first use so a database outage does not stop startup
    let store = PgResultStore::connect_lazy(&config.to_result_store_config());
    let metrics = Arc::new(WorkerMetrics::new()?);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(store),
        metrics.clone(),
    ));

    let shutdown = CancellationToken::new();
    let connector = Arc::new(AmqpConnector::new(config.broker.clone(), worker_id));
    let consumer = ConsumerLoop::new(connector, dispatcher, metrics.clone(), config.reconnect_delay())
        .with_shutdown(shutdown.clone());

    if let Some(port) = config.metrics_port {
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics, port, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Handle shutdown signals
    tokio::spawn(wait_for_signal(shutdown));

    consumer.run().await;

    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();

    tracing::info!("Received shutdown signal");
    shutdown.cancel();
}

async fn start_metrics_server(
    metrics: Arc<WorkerMetrics>,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    async fn metrics_handler(
        State(metrics): State<Arc<WorkerMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        metrics
            .render()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "task-worker",
            "--rabbitmq-host",
            "mq",
            "--db-name",
            "results",
            "--metrics-port",
            "9102",
        ])
        .unwrap();

        let mut config = WorkerConfig::default();
        config.database.host = "from-file".to_string();
        args.apply(&mut config);

        assert_eq!(config.broker.host, "mq");
        assert_eq!(config.database.name, "results");
        assert_eq!(config.metrics_port, Some(9102));
        // Unset flags keep earlier layers
        assert_eq!(config.database.host, "from-file");
    }
}
