//! Logging and metrics export for relayd.
//!
//! - [`logging`] - `tracing` subscriber setup driven by [`LogArgs`]
//! - [`prometheus`] - Prometheus exporter for the `metrics` facade

pub mod logging;
pub mod prometheus;

pub use logging::{LogArgs, LoggingError, init_logging};
pub use prometheus::{MetricsError, install_prometheus_exporter};
