// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Prometheus counters for the work queue, served on `/metrics`.

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Queue outcome counters. Cloning shares the underlying registry.
#[derive(Clone, Debug)]
pub struct Metrics {
    processed: IntCounter,
    retries: IntCounter,
    dropped: IntCounter,
    panics: IntCounter,
    registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let processed = IntCounter::new(
            "appgroup_queue_processed_total",
            "Queue items handled successfully",
        )?;
        registry.register(Box::new(processed.clone()))?;

        let retries = IntCounter::new(
            "appgroup_queue_retries_total",
            "Queue items requeued after a handler error",
        )?;
        registry.register(Box::new(retries.clone()))?;

        // Keys end up here once every attempt failed; nothing retries them afterwards.
        let dropped = IntCounter::new(
            "appgroup_queue_dropped_total",
            "Queue items dropped after exhausting their attempts",
        )?;
        registry.register(Box::new(dropped.clone()))?;

        let panics = IntCounter::new(
            "appgroup_queue_panics_total",
            "Handler invocations that panicked",
        )?;
        registry.register(Box::new(panics.clone()))?;

        Ok(Self {
            processed,
            retries,
            dropped,
            panics,
            registry,
        })
    }

    pub fn record_processed(&self) {
        self.processed.inc();
    }

    pub fn record_retry(&self) {
        self.retries.inc();
    }

    pub fn record_dropped(&self) {
        self.dropped.inc();
    }

    pub fn record_panic(&self) {
        self.panics.inc();
    }

    pub fn processed(&self) -> u64 {
        self.processed.get()
    }

    pub fn retries(&self) -> u64 {
        self.retries.get()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    pub fn panics(&self) -> u64 {
        self.panics.get()
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(body) => {
            let content_type = TextEncoder::new().format_type().to_string();
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve `/metrics` on `addr` until `token` is cancelled.
pub async fn serve(addr: &str, metrics: Metrics, token: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
    info!("Serving metrics on {}", addr);
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}
