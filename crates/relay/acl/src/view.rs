use libp2p::PeerId;
use relayd_net_connmgr::ConnManager;

/// Read-only view of live connections, consulted for per-peer limits.
pub trait ConnectionView: Send + Sync {
    /// Number of connections currently open to `peer`.
    fn connections_to(&self, peer: &PeerId) -> usize;
}

impl ConnectionView for ConnManager {
    fn connections_to(&self, peer: &PeerId) -> usize {
        self.peer_connections(peer)
    }
}
