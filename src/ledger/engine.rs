//! C8 — Engine / process bootstrap.
//!
//! Wires C0–C7 together: pulls events from the ingest adapter, dispatches
//! each to the retry controller as an independent task bounded by a
//! semaphore, and exposes the introspection HTTP surface. Shutdown is
//! cooperative, propagated through a `watch` channel into the ingest loop,
//! the retry controller's sleeps, and the deferred re-announcement tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info};

use crate::config::Config;
use crate::ledger::publish::spawn_deferred_reannouncement;
use crate::ledger::retry::{ProcessResult, process_with_retry};
use crate::store::LedgerStore;
use crate::substrate::{EventSource, OutboxPort};

#[derive(Default)]
pub struct Counters {
    pub processed: AtomicU64,
    pub rejected: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> serde_json::Value {
        json!({
            "processed": self.processed.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
            "retried": self.retried.load(Ordering::Relaxed),
            "failed": self.failed.load(Ordering::Relaxed),
        })
    }
}

pub struct Engine {
    store: Arc<dyn LedgerStore>,
    outbox: Arc<dyn OutboxPort>,
    source: Arc<dyn EventSource>,
    config: Arc<Config>,
    counters: Arc<Counters>,
    concurrency: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        outbox: Arc<dyn OutboxPort>,
        source: Arc<dyn EventSource>,
        config: Config,
        max_concurrency: usize,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Engine {
            store,
            outbox,
            source,
            config: Arc::new(config),
            counters: Arc::new(Counters::default()),
            concurrency: Arc::new(Semaphore::new(max_concurrency.max(1))),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Runs the per-event processing loop until the event source is
    /// exhausted or shutdown is signalled.
    pub async fn run(&self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let next = tokio::select! {
                event = self.source.recv() => event,
                _ = wait_for_shutdown(self.shutdown_rx.clone()) => None,
            };

            let Some(event) = next else { break };

            let permit = match self.concurrency.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let store = self.store.clone();
            let outbox = self.outbox.clone();
            let config = self.config.clone();
            let counters = self.counters.clone();
            let republish_interval = config.republish_interval;
            let shutdown_rx = self.shutdown_rx.clone();

            tokio::spawn(async move {
                let _permit = permit;
                match process_with_retry(&event, &*store, &*outbox, &config, &counters).await {
                    ProcessResult::Duplicate => {}
                    ProcessResult::Rejected => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    ProcessResult::Failed => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    ProcessResult::Committed(outcome) => {
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        if let crate::ledger::handlers::HandleOutcome::Committed {
                            affected,
                            triggering_event,
                        } = outcome
                        {
                            spawn_deferred_reannouncement(
                                store,
                                outbox,
                                affected,
                                triggering_event,
                                republish_interval,
                                shutdown_rx,
                            );
                        }
                    }
                }
            });
        }
        info!("engine processing loop stopped");
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// The `axum` router for the introspection surface (§6): `/healthz`,
    /// `/readyz`, `/metrics/counters`. Not a general REST API.
    pub fn introspection_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .route("/metrics/counters", get(counters_endpoint))
            .with_state(IntrospectionState {
                store: self.store.clone(),
                counters: self.counters.clone(),
            })
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Clone)]
struct IntrospectionState {
    store: Arc<dyn LedgerStore>,
    counters: Arc<Counters>,
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz(State(state): State<IntrospectionState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!(error = %err, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn counters_endpoint(State(state): State<IntrospectionState>) -> impl IntoResponse {
    Json(state.counters.snapshot())
}
