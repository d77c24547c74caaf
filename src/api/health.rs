//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::routes::OpsState;
use crate::connection_manager::{ConnectionState, ConnectionStats};
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` while connected, `degraded` otherwise
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connection: ConnectionHealthResponse,
    pub subscriptions: SubscriptionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_rtt_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionHealthResponse {
    pub count: usize,
    pub channels: Vec<String>,
    pub queued_ops: usize,
}

fn health_from_stats(stats: ConnectionStats, uptime_seconds: u64) -> HealthResponse {
    let status = if stats.state.is_connected() {
        "healthy"
    } else {
        "degraded"
    };

    HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        connection: ConnectionHealthResponse {
            state: stats.state,
            connection_id: stats.connection_id,
            connected_since: stats.connected_since,
            retry_count: stats.retry_count,
            heartbeat_rtt_ms: stats.heartbeat.last_rtt_ms,
        },
        subscriptions: SubscriptionHealthResponse {
            count: stats.subscriptions.len(),
            channels: stats
                .subscriptions
                .into_iter()
                .map(|s| s.channel)
                .collect(),
            queued_ops: stats.queued_subscription_ops,
        },
    }
}

/// GET /health
pub async fn health(State(state): State<OpsState>) -> Result<Json<HealthResponse>> {
    let stats = state.manager.stats().await?;
    let uptime_seconds = state.started_at.elapsed().as_secs();
    Ok(Json(health_from_stats(stats, uptime_seconds)))
}

/// GET /stats
pub async fn stats(State(state): State<OpsState>) -> Result<Json<ConnectionStats>> {
    Ok(Json(state.manager.stats().await?))
}
