//! The `/stats` HTTP endpoint (SPEC_FULL.md §6 ambient addition), grounded
//! on `forwarder`/`server`'s small `axum` status routers: `GET /healthz`
//! (always 200, the process is running), `GET /readyz` (200 once the
//! queues and outputs this handle was built from are initialized), and
//! `GET /stats` (JSON snapshot of queue depths, the blocked flag and the
//! ingress accept/drop counters).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use lc_queue::Queue;

use crate::blocked::Blocked;
use crate::stats::Stats;

#[derive(Clone)]
pub struct StatsHttpState {
    pub standard_queue: Queue,
    pub prior_queue: Option<Queue>,
    pub stats: Stats,
    pub blocked: Blocked,
}

#[derive(Serialize)]
struct StatsBody {
    blocked: bool,
    live_connections: i64,
    pipeline_accepted: i64,
    pipeline_dropped: i64,
    size_rejected: i64,
    standard_queue_depth: i64,
    prior_queue_depth: Option<i64>,
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz() -> impl IntoResponse {
    StatusCode::OK
}

async fn stats(State(state): State<Arc<StatsHttpState>>) -> impl IntoResponse {
    Json(StatsBody {
        blocked: state.blocked.is_blocked(),
        live_connections: state.stats.live_connections(),
        pipeline_accepted: state.stats.accepted(),
        pipeline_dropped: state.stats.dropped(),
        size_rejected: state.stats.size_rejected(),
        standard_queue_depth: state.standard_queue.depth(),
        prior_queue_depth: state.prior_queue.as_ref().map(Queue::depth),
    })
}

fn router(state: Arc<StatsHttpState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Serve the stats router on `bind` until `shutdown_rx` fires.
pub async fn run(bind: &str, state: StatsHttpState, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind, "stats http listening");
    let app = router(Arc::new(state));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
}
