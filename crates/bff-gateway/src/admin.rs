use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bff_cache::{CacheStats, ResponseStore};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State for the admin listener.
#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<ResponseStore>,
    pub routes: Arc<Vec<String>>,
    pub prometheus: Option<PrometheusHandle>,
    pub started: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub inserts: u64,
    pub swept: u64,
    pub size: usize,
    pub freshness_seconds: u64,
}

impl CacheMetrics {
    fn from_store(store: &ResponseStore) -> Self {
        let stats: CacheStats = store.stats();
        CacheMetrics {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            stale: stats.stale,
            inserts: stats.inserts,
            swept: stats.swept,
            size: stats.current_size,
            freshness_seconds: store.freshness().as_secs(),
        }
    }
}

/// Outcome of one proxied request, as seen by the request counter.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("bff_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_upstream_latency(elapsed: Duration) {
    metrics::histogram!("bff_upstream_latency_seconds").record(elapsed.as_secs_f64());
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_handler))
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn prometheus_handler(State(state): State<AdminState>) -> impl IntoResponse {
    metrics::gauge!("bff_cache_entries").set(state.store.len() as f64);
    match &state.prometheus {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

/// GET /api/stats — one-shot stats endpoint.
async fn stats_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "cache": CacheMetrics::from_store(&state.store),
        "routes": state.routes.as_ref(),
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}

async fn health() -> &'static str {
    "ok"
}
