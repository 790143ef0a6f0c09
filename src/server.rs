/// Server setup and initialization
///
/// Wires together all components: database, process registry, lease queue,
/// stage engine, subscriber manager and HTTP routes.

use crate::{
    api::{create_process_routes, create_subscription_routes, create_workflow_routes, AppState},
    broker::LeaseQueue,
    config::Config,
    process::{ProcessRegistry, ProcessStorage},
    runtime::{DispatchBridge, StageEngine},
    store::Database,
    subscriber::{SubscriberManager, SubscriberStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// A fully wired engine instance
pub struct App {
    pub database: Database,
    pub engine: Arc<StageEngine>,
    pub subscribers: Arc<SubscriberManager>,
}

impl App {
    /// Open storage, load deployed processes and resume persisted subscribers
    pub async fn build(config: &Config) -> Result<Self> {
        tracing::info!("🗄️ Connecting to database in {}", config.database.data_dir);
        let database = Database::connect(&config.database).await?;
        let pool = database.pool().clone();

        tracing::info!("📊 Initializing process registry");
        let registry = Arc::new(ProcessRegistry::new(ProcessStorage::new(pool.clone())));
        registry
            .init_from_storage()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load process configs from storage: {}", e))?;

        let queue = LeaseQueue::new(pool.clone(), config.broker.poll_interval);

        tracing::info!("🚀 Initializing stage engine");
        let engine = Arc::new(StageEngine::new(
            ProcessStorage::new(pool.clone()),
            Arc::clone(&registry),
            queue.clone(),
        ));

        tracing::info!("📡 Initializing subscriber manager");
        let bridge = DispatchBridge::new(config.subscriber.http_timeout)?;
        let subscribers = Arc::new(SubscriberManager::new(
            SubscriberStorage::new(pool),
            registry,
            queue,
            bridge,
            config.broker.clone(),
            config.subscriber.clone(),
        ));

        subscribers
            .recover_all()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to recover subscribers: {}", e))?;

        tracing::info!("✅ Application initialized successfully");
        Ok(Self {
            database,
            engine,
            subscribers,
        })
    }

    /// HTTP router over this instance
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: Arc::clone(&self.engine),
            subscribers: Arc::clone(&self.subscribers),
        };

        Router::new()
            .route("/healthz", get(health_check))
            .merge(create_process_routes())
            .merge(create_workflow_routes())
            .merge(create_subscription_routes())
            .with_state(state)
    }

    /// Stop subscriber loops and close the pool
    pub async fn shutdown(&self) {
        self.subscribers.shutdown().await;
        self.database.close().await;
    }
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then stops every subscriber loop before returning.
/// Leases held at shutdown expire and are reclaimed after restart.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting stageline server...");

    let app = App::build(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router().into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down");
    app.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check() -> &'static str {
    "ok"
}
