use std::time::Duration;

use relayd_net_routing::DEFAULT_BOOTSTRAP_PEERS;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Extra, network::parse_multiaddrs};

/// Routing overlay bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Seed addresses, each ending in `/p2p/<peer id>`.
    pub bootstrap_peers: Vec<String>,
    #[serde(with = "crate::serde_duration")]
    pub bootstrap_timeout: Duration,
    pub min_seed_responses: usize,
    #[serde(with = "crate::serde_duration")]
    pub retry_interval: Duration,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let defaults = relayd_net_routing::RoutingConfig::default();
        Self {
            bootstrap_peers: DEFAULT_BOOTSTRAP_PEERS.iter().map(|s| s.to_string()).collect(),
            bootstrap_timeout: defaults.bootstrap_timeout,
            min_seed_responses: defaults.min_seed_responses,
            retry_interval: defaults.retry_interval,
            extra: Extra::new(),
        }
    }
}

impl RoutingConfig {
    pub fn to_routing_config(&self) -> Result<relayd_net_routing::RoutingConfig, ConfigError> {
        Ok(relayd_net_routing::RoutingConfig {
            bootstrap_peers: parse_multiaddrs("routing.bootstrapPeers", &self.bootstrap_peers)?,
            bootstrap_timeout: self.bootstrap_timeout,
            min_seed_responses: self.min_seed_responses,
            retry_interval: self.retry_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_seeds_parse() {
        let config = RoutingConfig::default().to_routing_config().unwrap();
        assert_eq!(config.bootstrap_peers.len(), DEFAULT_BOOTSTRAP_PEERS.len());
        assert!(config.seeds().is_ok());
    }

    #[test]
    fn empty_seed_list_is_allowed() {
        let config: RoutingConfig = serde_json::from_str(r#"{ "bootstrapPeers": [] }"#).unwrap();
        assert!(config.to_routing_config().unwrap().bootstrap_peers.is_empty());
        assert_eq!(config.retry_interval, Duration::from_secs(300));
    }
}
