use std::collections::HashSet;

use ipnet::IpNet;
use libp2p::PeerId;

use crate::acl::Verdict;

/// Static ACL configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclConfig {
    /// Peers always allowed (unless denied).
    pub allow_peers: HashSet<PeerId>,
    /// Peers always denied. Takes precedence over everything else.
    pub deny_peers: HashSet<PeerId>,
    /// Request source networks that are allowed.
    pub allow_subnets: Vec<IpNet>,
    /// Verdict for unlisted peers. Derived when unset, see
    /// [`AclConfig::default_verdict`].
    pub default: Option<Verdict>,
    /// Deny peers that already hold more than this many connections.
    pub max_conns_per_peer: Option<usize>,
    /// Log denials at info level.
    pub audit: bool,
}

impl AclConfig {
    /// Configured default, or deny if any allow list is set and allow otherwise.
    pub fn default_verdict(&self) -> Verdict {
        self.default.unwrap_or_else(|| {
            if self.allow_peers.is_empty() && self.allow_subnets.is_empty() {
                Verdict::Allow
            } else {
                Verdict::Deny
            }
        })
    }
}
