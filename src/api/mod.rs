//! Ops HTTP endpoints served by the runner binary.

mod health;
mod metrics;
mod routes;

pub use health::{health, stats, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::{ops_routes, OpsState};
