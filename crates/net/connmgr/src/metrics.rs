//! Connection manager metrics.

use metrics::{Counter, Gauge};

#[derive(Clone, Debug)]
pub(crate) struct ConnManagerMetrics {
    /// Live (not closing) connections.
    pub(crate) connections: Gauge,
    /// Connections selected for pruning.
    pub(crate) pruned_total: Counter,
    /// Trim passes that could not reach the low watermark.
    pub(crate) pressure_total: Counter,
}

impl Default for ConnManagerMetrics {
    fn default() -> Self {
        Self {
            connections: metrics::gauge!("relayd_connmgr_connections"),
            pruned_total: metrics::counter!("relayd_connmgr_pruned_total"),
            pressure_total: metrics::counter!("relayd_connmgr_pressure_total"),
        }
    }
}
