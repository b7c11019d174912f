use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;

use seatrelay::api::{ApiState, api_routes};
use seatrelay::cipher::BrokerKey;
use seatrelay::config::BrokerConfig;
use seatrelay::dispatcher::{BrokerState, Dispatcher, task_routes};
use seatrelay::handler::BrokeredHandler;
use seatrelay::registry::HandlerRegistry;
use seatrelay::task::{Manager, MemoryTaskStore, TaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BrokerConfig::from_env();

    eprintln!("Seatrelay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Task endpoint: http://{}", config.task_bind);
    eprintln!("   Admin API: http://{}", config.api_bind);

    // Key material is the one thing we refuse to start without.
    let key = Arc::new(BrokerKey::load(&config.private_key_path)?);

    // ── Dispatcher & handlers ────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher.clone()));
    let handlers = Arc::new(HandlerRegistry::new());
    for name in &config.handlers {
        handlers
            .register(name, Arc::new(BrokeredHandler::new(name, Arc::clone(&dispatcher))))
            .with_context(|| format!("registering handler {name}"))?;
    }
    eprintln!("   Handlers: {}", handlers.names().join(", "));

    // ── Tasks ────────────────────────────────────────────────────────────
    let store: Arc<dyn TaskStore> = match &config.tasks_file {
        Some(path) => {
            eprintln!("   Tasks file: {}", path.display());
            Arc::new(MemoryTaskStore::open(path).await?)
        }
        None => Arc::new(MemoryTaskStore::new()),
    };
    let manager = Arc::new(Manager::new(Arc::clone(&handlers), store, config.scheduler));
    let started = manager.init().await?;
    tracing::info!(count = started, "Stored tasks started");

    // ── HTTP ─────────────────────────────────────────────────────────────
    let task_app = task_routes(BrokerState {
        dispatcher: Arc::clone(&dispatcher),
        key,
        handlers: Arc::clone(&handlers),
    });
    let api_app = api_routes(ApiState { manager }, config.cors);

    let task_listener = tokio::net::TcpListener::bind(&config.task_bind)
        .await
        .with_context(|| format!("binding task endpoint {}", config.task_bind))?;
    let api_listener = tokio::net::TcpListener::bind(&config.api_bind)
        .await
        .with_context(|| format!("binding admin API {}", config.api_bind))?;

    tracing::info!(addr = %config.task_bind, "Task endpoint listening");
    tracing::info!(addr = %config.api_bind, "Admin API listening");

    tokio::select! {
        res = axum::serve(task_listener, task_app).into_future() => res.context("task endpoint")?,
        res = axum::serve(api_listener, api_app).into_future() => res.context("admin API")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}
