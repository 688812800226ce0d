use libp2p::Multiaddr;
use relayd_net_local::AddressPolicy;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Extra};

/// Listen and announce addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Addresses the host binds.
    #[serde(alias = "ListenAddrs")]
    pub listen_addrs: Vec<String>,
    /// Fixed announce list. Empty announces public listen addresses.
    #[serde(alias = "AnnounceAddrs")]
    pub announce_addrs: Vec<String>,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["/ip4/0.0.0.0/tcp/4001".to_string(), "/ip6/::/tcp/4001".to_string()],
            announce_addrs: Vec::new(),
            extra: Extra::new(),
        }
    }
}

impl NetworkConfig {
    pub fn listen_multiaddrs(&self) -> Result<Vec<Multiaddr>, ConfigError> {
        parse_multiaddrs("network.listenAddrs", &self.listen_addrs)
    }

    pub fn address_policy(&self) -> Result<AddressPolicy, ConfigError> {
        let announce = parse_multiaddrs("network.announceAddrs", &self.announce_addrs)?;
        Ok(AddressPolicy::from_announce_addrs(announce))
    }
}

pub(crate) fn parse_multiaddrs(
    field: &'static str,
    values: &[String],
) -> Result<Vec<Multiaddr>, ConfigError> {
    values
        .iter()
        .map(|value| {
            value.parse().map_err(|source| ConfigError::Multiaddr {
                field,
                value: value.clone(),
                source,
            })
        })
        .collect()
}
