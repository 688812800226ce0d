use std::time::Duration;

use libp2p::{
    Multiaddr, PeerId, StreamProtocol, kad,
    kad::store::MemoryStore,
    multiaddr::Protocol,
};

/// Kademlia protocol of the public IPFS DHT.
pub const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/ipfs/kad/1.0.0");

/// Public IPFS bootstrap peers.
pub const DEFAULT_BOOTSTRAP_PEERS: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Routing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// A bootstrap address does not end in `/p2p/<peer id>`.
    #[error("bootstrap address {0} has no /p2p/ peer id")]
    MissingPeerId(Multiaddr),
}

/// Bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Seed peers, each ending in `/p2p/<peer id>`.
    pub bootstrap_peers: Vec<Multiaddr>,
    /// Give up on a bootstrap round after this long.
    pub bootstrap_timeout: Duration,
    /// Seeds that must be reached for the overlay to count as active.
    pub min_seed_responses: usize,
    /// Delay between automatic retries while degraded.
    pub retry_interval: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers: DEFAULT_BOOTSTRAP_PEERS
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            bootstrap_timeout: Duration::from_secs(60),
            min_seed_responses: 1,
            retry_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl RoutingConfig {
    /// Split seed addresses into peer id and dial address.
    pub fn seeds(&self) -> Result<Vec<(PeerId, Multiaddr)>, RoutingError> {
        self.bootstrap_peers
            .iter()
            .map(|addr| {
                let mut dial = addr.clone();
                match dial.pop() {
                    Some(Protocol::P2p(peer)) => Ok((peer, dial)),
                    _ => Err(RoutingError::MissingPeerId(addr.clone())),
                }
            })
            .collect()
    }
}

/// Create the Kademlia behaviour in server mode.
pub fn build_kad(local_peer_id: PeerId, config: &RoutingConfig) -> kad::Behaviour<MemoryStore> {
    let mut kad_config = kad::Config::new(KAD_PROTOCOL);
    kad_config.set_query_timeout(config.bootstrap_timeout);
    let mut kad = kad::Behaviour::with_config(
        local_peer_id,
        MemoryStore::new(local_peer_id),
        kad_config,
    );
    kad.set_mode(Some(kad::Mode::Server));
    kad
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_seeds_parse() {
        let config = RoutingConfig::default();
        assert_eq!(config.bootstrap_peers.len(), DEFAULT_BOOTSTRAP_PEERS.len());
        let seeds = config.seeds().unwrap();
        assert_eq!(seeds.len(), DEFAULT_BOOTSTRAP_PEERS.len());
        assert_eq!(
            seeds.last().unwrap().1,
            "/ip4/104.131.131.82/tcp/4001".parse::<Multiaddr>().unwrap()
        );
    }

    #[test]
    fn seed_without_peer_id_is_rejected() {
        let config = RoutingConfig {
            bootstrap_peers: vec!["/ip4/34.120.1.1/tcp/4001".parse().unwrap()],
            ..Default::default()
        };
        assert_matches!(config.seeds(), Err(RoutingError::MissingPeerId(_)));
    }
}
