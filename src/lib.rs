//! httpcron -- a restart-safe HTTP job scheduler.
//!
//! Targets describe HTTP requests; schedules fire them on a fixed interval,
//! optionally bounded by a time window and a run limit. Every firing is
//! recorded as a run with a classified outcome.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod observers;
pub mod scheduler;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::state::AppState;
use crate::config::{AppConfig, LoggingConfig};
use crate::dispatch::http::HttpExecutor;
use crate::dispatch::Dispatcher;
use crate::observers::{LiveMetrics, ObserverSet, RunObserver, RunRecorder};
use crate::scheduler::{Clock, Scheduler, SchedulerEngine, SystemClock};
use crate::storage::SqliteStore;

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the daemon: API server, scheduler loop, and dispatcher. Returns after
/// Ctrl-C once the loop has stopped and in-flight executions have drained.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Storage
    let db_path = &config.storage.db_path;
    info!(db_path = %db_path.display(), "initializing database");
    let pool = storage::open_pool(db_path)?;
    let store = Arc::new(SqliteStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 2. Dispatcher with its observers; the recorder goes first
    let metrics = Arc::new(LiveMetrics::default());
    let observers = ObserverSet::new(vec![
        Arc::new(RunRecorder::new(store.clone())) as Arc<dyn RunObserver>,
        metrics.clone() as Arc<dyn RunObserver>,
    ]);
    let executor =
        Arc::new(HttpExecutor::new(&config.dispatch).context("failed to build http client")?);
    let dispatcher = Dispatcher::new(executor, observers, config.dispatch.max_concurrency);

    // 3. Scheduler loop (background task)
    let engine = SchedulerEngine::new(
        store.clone(),
        dispatcher.clone(),
        clock.clone(),
        config.scheduler.tick_interval(),
    );
    let shutdown = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(shutdown.clone()));

    // 4. API server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let state = AppState {
        scheduler: Scheduler::new(store, clock),
        metrics,
    };
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "httpcron listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Stop ticking, then drain
    shutdown.cancel();
    if let Err(e) = engine_task.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }
    info!(in_flight = dispatcher.in_flight(), "draining in-flight executions");
    dispatcher.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
    }
}
