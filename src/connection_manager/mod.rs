//! Connection manager: one realtime connection with many subscriptions.
//!
//! - `manager`: public handle ([`ConnectionManager`])
//! - `event_loop`: actor owning the link, policy, registry and timers
//! - `scheduler`: named timers
//! - `types`: state and lifecycle events
//! - `stats`: statistics snapshot

mod event_loop;
mod manager;
mod scheduler;
mod stats;
mod types;

pub use manager::{ConnectionManager, ManagerConfig};
pub use scheduler::{Pass, Scheduler, TimerKind};
pub use stats::ConnectionStats;
pub use types::{ConnectionEvent, ConnectionState};
