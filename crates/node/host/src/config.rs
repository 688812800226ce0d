use std::time::Duration;

use libp2p::Multiaddr;
use relayd_identity::NetworkSecret;
use relayd_net_connmgr::ConnManagerConfig;
use relayd_net_local::AddressPolicy;
use relayd_net_rcmgr::ResourceManagerConfig;
use relayd_net_routing::RoutingConfig;

/// Connections with no active streams close after this long.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed to build a [`RelayHost`](crate::RelayHost).
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub listen_addrs: Vec<Multiaddr>,
    pub address_policy: AddressPolicy,
    pub connmgr: ConnManagerConfig,
    pub resources: ResourceManagerConfig,
    pub routing: RoutingConfig,
    /// Restrict transport connections to peers holding this key.
    pub network_secret: Option<NetworkSecret>,
    pub idle_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            address_policy: AddressPolicy::Automatic,
            connmgr: ConnManagerConfig::default(),
            resources: ResourceManagerConfig::default(),
            routing: RoutingConfig::default(),
            network_secret: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}
