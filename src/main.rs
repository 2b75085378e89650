//! custodial-ledger — process entry point (C8: engine / process bootstrap).
//!
//! Loads configuration, initialises logging, connects to Postgres, wires the
//! store/outbox/event-source into an [`Engine`], and runs the per-event
//! processing loop alongside a small introspection HTTP surface until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use custodial_ledger::config::Config;
use custodial_ledger::ledger::Engine;
use custodial_ledger::logging;
use custodial_ledger::store::postgres::PostgresStore;
use custodial_ledger::substrate::{ChannelEventSource, RecordingOutbox};

/// Connection attempts at boot before giving up; connection failures here
/// are transient by nature and should not crash-loop a container on the
/// first retry.
const STARTUP_CONNECT_ATTEMPTS: u32 = 5;
const STARTUP_CONNECT_BACKOFF: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("configuration error: {e}");
        e
    })?;
    let _log_guard = logging::init_logging(&config);

    info!(git_hash = env!("GIT_HASH"), "starting custodial-ledger");

    let pool = connect_with_retry(&config).await?;
    let store: Arc<dyn custodial_ledger::LedgerStore> = Arc::new(PostgresStore::new(pool));

    // The relay subscription and outgoing-event transport are external
    // collaborators (signing, relay fan-out, reconnection) not owned by this
    // crate; `ChannelEventSource` is the handoff point a relay-client task
    // would feed, and `RecordingOutbox` stands in until a signing outbox is
    // wired in. Swapping either for a substrate-specific adapter requires no
    // change to the engine, only to this wiring.
    let (_relay_feed, source) = ChannelEventSource::channel(1024);
    let source = Arc::new(source);
    let outbox = Arc::new(RecordingOutbox::new());

    let max_concurrency = std::env::var("MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10usize);

    let engine = Engine::new(store, outbox, source, config.clone(), max_concurrency);
    let shutdown = engine.shutdown_handle();

    let introspection = engine.introspection_router();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "introspection surface listening");

    let http_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, introspection).await {
            error!(%err, "introspection server exited");
        }
    });

    tokio::select! {
        _ = engine.run() => {
            info!("event source exhausted, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown.send(true);
    http_task.abort();

    info!("custodial-ledger stopped");
    Ok(())
}

/// Builds the pooled Postgres client, retrying the initial connection a
/// bounded number of times. A database that is still coming up when this
/// process starts (common in container orchestration) should not be treated
/// as a fatal misconfiguration.
async fn connect_with_retry(config: &Config) -> anyhow::Result<sqlx::PgPool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(err) if attempt < STARTUP_CONNECT_ATTEMPTS => {
                warn!(attempt, error = %err, "database connection failed, retrying");
                tokio::time::sleep(STARTUP_CONNECT_BACKOFF).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
