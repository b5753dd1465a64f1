//! Runtime health tracking.
//!
//! Counts processed messages and commands, derives a health status from the
//! error rates, and runs a periodic monitor that logs problems.

mod monitor;

pub use monitor::{
    CheckStatus, HealthCheck, HealthMessage, HealthMonitor, HealthReport, HealthStatus,
    format_uptime,
};
