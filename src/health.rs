//! Liveness, readiness, and metrics exposition (§6).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use crate::metrics::Metrics;

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Shared flag flipped once startup has finished wiring every subsystem.
#[derive(Clone)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ReadinessFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct ProbeState {
    started_at: Arc<AtomicI64>,
    ready: ReadinessFlag,
    metrics: Metrics,
}

/// Builds the probe router: `GET /healthz`, `GET /readyz`, `GET /metrics`.
pub fn router(ready: ReadinessFlag, metrics: Metrics) -> Router {
    let state = ProbeState {
        started_at: Arc::new(AtomicI64::new(now_secs())),
        ready,
        metrics,
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn healthz(State(state): State<ProbeState>) -> impl IntoResponse {
    let uptime = now_secs() - state.started_at.load(Ordering::SeqCst);
    (StatusCode::OK, Json(json!({ "status": "healthy", "uptime": uptime })))
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    let uptime = now_secs() - state.started_at.load(Ordering::SeqCst);
    if state.ready.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready", "uptime": uptime })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "message": "application is starting" })),
        )
    }
}

async fn metrics_handler(State(state): State<ProbeState>) -> impl IntoResponse {
    state.metrics.export()
}

/// Runs the probe server until `shutdown` is cancelled.
pub async fn serve(
    addr: std::net::SocketAddr,
    ready: ReadinessFlag,
    metrics: Metrics,
    shutdown: crate::shutdown::ShutdownHandle,
) -> anyhow::Result<()> {
    let app = router(ready, metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "probe server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flag_starts_false() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
        flag.set_ready();
        assert!(flag.is_ready());
    }
}
