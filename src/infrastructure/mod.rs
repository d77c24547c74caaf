//! Infrastructure layer modules
//!
//! Shared components used by every other layer:
//! - `config`: layered settings (defaults, files, environment)
//! - `error`: unified error types
//! - `metrics`: Prometheus metrics helpers

pub mod config;
pub mod error;
pub mod metrics;
