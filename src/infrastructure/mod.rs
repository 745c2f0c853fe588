//! Infrastructure Layer
//!
//! Connection lifecycle, health monitoring and cross-cutting components.

pub mod connection_manager;
pub mod health_monitor;
pub mod rate_limiter;
pub mod shutdown;

pub use connection_manager::{ConnectionManager, ConnectionManagerConfig, DisconnectReport};
pub use health_monitor::{
    CycleReport, FailoverTrigger, HealthMonitor, HealthMonitorConfig, ProbeError, ProbeResult,
};
pub use rate_limiter::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use shutdown::{shutdown_signal, QueryGuard, ShutdownController};
