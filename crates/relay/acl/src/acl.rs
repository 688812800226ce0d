use std::sync::Arc;

use libp2p::{Multiaddr, PeerId};
use relayd_net_local::extract_ip;
use tracing::{debug, info};

use crate::{config::AclConfig, view::ConnectionView};

/// Outcome of an ACL evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

/// A relay request to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Reserve relay capacity, requested from `addr`.
    Reserve { addr: Multiaddr },
    /// Open a circuit from `src_addr` to `dst` through the relay.
    ///
    /// `dst` is `None` when only the source is known at admission time.
    /// Circuits can only target peers holding a reservation, and denied
    /// peers never obtain one.
    Connect {
        src_addr: Multiaddr,
        dst: Option<PeerId>,
    },
}

impl RelayAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Reserve { .. } => "reserve",
            Self::Connect { .. } => "connect",
        }
    }

    fn source_addr(&self) -> &Multiaddr {
        match self {
            Self::Reserve { addr } => addr,
            Self::Connect { src_addr, .. } => src_addr,
        }
    }
}

/// Which rule decided a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    DenyList,
    DestinationDenied,
    ConnectionLimit,
    AllowList,
    Subnet,
    Default,
}

/// Relay access control list.
///
/// Cheap to share behind an `Arc`; evaluation only reads immutable state and
/// the connection view.
pub struct Acl {
    config: AclConfig,
    default: Verdict,
    view: Arc<dyn ConnectionView>,
}

impl std::fmt::Debug for Acl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acl")
            .field("config", &self.config)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl Acl {
    pub fn new(config: AclConfig, view: Arc<dyn ConnectionView>) -> Self {
        let default = config.default_verdict();
        debug!(
            allow_peers = config.allow_peers.len(),
            deny_peers = config.deny_peers.len(),
            allow_subnets = config.allow_subnets.len(),
            %default,
            "relay ACL configured"
        );
        Self {
            config,
            default,
            view,
        }
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }

    /// The verdict for peers no rule matches.
    pub fn default_verdict(&self) -> Verdict {
        self.default
    }

    /// Decide whether `peer` may perform `action`.
    pub fn evaluate(&self, peer: &PeerId, action: &RelayAction) -> Verdict {
        let (verdict, rule) = self.decide(peer, action);

        let action_name = action.name();
        let verdict_name: &'static str = verdict.into();
        metrics::counter!(
            "relayd_acl_verdicts_total",
            "action" => action_name,
            "verdict" => verdict_name
        )
        .increment(1);

        if verdict == Verdict::Deny {
            if self.config.audit {
                info!(%peer, action = action_name, ?rule, "relay request denied");
            } else {
                debug!(%peer, action = action_name, ?rule, "relay request denied");
            }
        }
        verdict
    }

    fn decide(&self, peer: &PeerId, action: &RelayAction) -> (Verdict, Rule) {
        if self.config.deny_peers.contains(peer) {
            return (Verdict::Deny, Rule::DenyList);
        }
        if let RelayAction::Connect { dst: Some(dst), .. } = action {
            if self.config.deny_peers.contains(dst) {
                return (Verdict::Deny, Rule::DestinationDenied);
            }
        }
        if let Some(max) = self.config.max_conns_per_peer {
            if self.view.connections_to(peer) > max {
                return (Verdict::Deny, Rule::ConnectionLimit);
            }
        }
        if self.config.allow_peers.contains(peer) {
            return (Verdict::Allow, Rule::AllowList);
        }
        if let Some(ip) = extract_ip(action.source_addr()) {
            if self.config.allow_subnets.iter().any(|net| net.contains(&ip)) {
                return (Verdict::Allow, Rule::Subnet);
            }
        }
        (self.default, Rule::Default)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use libp2p::identity::{Keypair, ed25519};
    use proptest::prelude::*;

    use super::*;

    struct FixedView(HashMap<PeerId, usize>);

    impl ConnectionView for FixedView {
        fn connections_to(&self, peer: &PeerId) -> usize {
            self.0.get(peer).copied().unwrap_or(0)
        }
    }

    fn no_connections() -> Arc<dyn ConnectionView> {
        Arc::new(FixedView(HashMap::new()))
    }

    fn test_peer_id(n: u8) -> PeerId {
        let mut bytes = [7u8; 32];
        bytes[0] = n;
        let key = ed25519::SecretKey::try_from_bytes(bytes).unwrap();
        Keypair::from(ed25519::Keypair::from(key))
            .public()
            .to_peer_id()
    }

    fn reserve(ip: &str) -> RelayAction {
        RelayAction::Reserve {
            addr: format!("/ip4/{ip}/tcp/4001").parse().unwrap(),
        }
    }

    #[test]
    fn default_deny_with_allow_list() {
        let p1 = test_peer_id(1);
        let p2 = test_peer_id(2);
        let acl = Acl::new(
            AclConfig {
                allow_peers: HashSet::from([p1]),
                default: Some(Verdict::Deny),
                ..Default::default()
            },
            no_connections(),
        );
        assert_eq!(acl.evaluate(&p1, &reserve("34.120.1.1")), Verdict::Allow);
        assert_eq!(acl.evaluate(&p2, &reserve("34.120.1.1")), Verdict::Deny);
    }

    #[test]
    fn derived_default() {
        assert_eq!(AclConfig::default().default_verdict(), Verdict::Allow);
        let with_allow = AclConfig {
            allow_subnets: vec!["10.0.0.0/8".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(with_allow.default_verdict(), Verdict::Deny);
        let explicit = AclConfig {
            allow_peers: HashSet::from([test_peer_id(1)]),
            default: Some(Verdict::Allow),
            ..Default::default()
        };
        assert_eq!(explicit.default_verdict(), Verdict::Allow);
    }

    #[test]
    fn deny_list_beats_allow_list() {
        let p = test_peer_id(3);
        let acl = Acl::new(
            AclConfig {
                allow_peers: HashSet::from([p]),
                deny_peers: HashSet::from([p]),
                ..Default::default()
            },
            no_connections(),
        );
        assert_eq!(acl.evaluate(&p, &reserve("34.120.1.1")), Verdict::Deny);
    }

    #[test]
    fn subnet_allows_by_source_address() {
        let acl = Acl::new(
            AclConfig {
                allow_subnets: vec!["45.76.10.0/24".parse().unwrap()],
                ..Default::default()
            },
            no_connections(),
        );
        let p = test_peer_id(4);
        assert_eq!(acl.evaluate(&p, &reserve("45.76.10.9")), Verdict::Allow);
        assert_eq!(acl.evaluate(&p, &reserve("34.120.1.1")), Verdict::Deny);
    }

    #[test]
    fn connect_to_denied_destination() {
        let src = test_peer_id(5);
        let dst = test_peer_id(6);
        let acl = Acl::new(
            AclConfig {
                deny_peers: HashSet::from([dst]),
                ..Default::default()
            },
            no_connections(),
        );
        let connect = RelayAction::Connect {
            src_addr: "/ip4/34.120.1.1/tcp/4001".parse().unwrap(),
            dst: Some(dst),
        };
        assert_eq!(acl.evaluate(&src, &connect), Verdict::Deny);
        assert_eq!(acl.evaluate(&src, &reserve("34.120.1.1")), Verdict::Allow);
    }

    #[test]
    fn per_peer_connection_limit() {
        let busy = test_peer_id(7);
        let idle = test_peer_id(8);
        let view = Arc::new(FixedView(HashMap::from([(busy, 5), (idle, 1)])));
        let acl = Acl::new(
            AclConfig {
                allow_peers: HashSet::from([busy, idle]),
                max_conns_per_peer: Some(2),
                ..Default::default()
            },
            view,
        );
        assert_eq!(acl.evaluate(&busy, &reserve("34.120.1.1")), Verdict::Deny);
        assert_eq!(acl.evaluate(&idle, &reserve("34.120.1.1")), Verdict::Allow);
    }

    proptest! {
        #[test]
        fn evaluation_is_idempotent(
            allow in prop::collection::hash_set(0u8..32, 0..8),
            deny in prop::collection::hash_set(0u8..32, 0..8),
            default in prop::option::of(any::<bool>()),
            peer in 0u8..32,
            octets in any::<[u8; 4]>(),
        ) {
            let config = AclConfig {
                allow_peers: allow.iter().map(|n| test_peer_id(*n)).collect(),
                deny_peers: deny.iter().map(|n| test_peer_id(*n)).collect(),
                default: default.map(|a| if a { Verdict::Allow } else { Verdict::Deny }),
                ..Default::default()
            };
            let acl = Acl::new(config, no_connections());
            let action = reserve(&format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]));
            let peer = test_peer_id(peer);

            let first = acl.evaluate(&peer, &action);
            for _ in 0..3 {
                prop_assert_eq!(acl.evaluate(&peer, &action), first);
            }
            if deny.iter().any(|n| test_peer_id(*n) == peer) {
                prop_assert_eq!(first, Verdict::Deny);
            }
        }
    }
}
