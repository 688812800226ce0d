//! Connection admission controller.
//!
//! Tracks live connections and keeps their number between a low and a high
//! watermark. Pruning is soft and reactive: when the count reaches the high
//! watermark the oldest, least valuable connections past their grace period
//! are closed until the count is back at the low watermark. Connections of
//! protected peers are never pruned.
//!
//! The hard, synchronous admission gate lives in the resource manager; this
//! crate never refuses a connection.

mod behaviour;
mod config;
mod manager;
mod metrics;

pub use behaviour::ConnManagerBehaviour;
pub use config::{
    ConnManagerConfig, ConnManagerError, DEFAULT_GRACE_PERIOD, DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER,
    DEFAULT_TRIM_INTERVAL,
};
pub use manager::{ConnManager, ConnectionPhase, ConnectionRecord, Direction};
