use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use crate::connection_manager::ConnectionManager;

/// Shared state of the ops endpoints
#[derive(Clone)]
pub struct OpsState {
    pub manager: Arc<ConnectionManager>,
    pub started_at: Instant,
}

impl OpsState {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
        }
    }
}

pub fn ops_routes(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
