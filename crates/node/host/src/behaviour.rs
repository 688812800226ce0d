use std::{convert::Infallible, sync::Arc};

use libp2p::{
    identify,
    identity::PublicKey,
    kad::{self, store::MemoryStore},
    ping, relay,
    swarm::{NetworkBehaviour, behaviour::toggle::Toggle},
};
use relayd_net_connmgr::{ConnManager, ConnManagerBehaviour};
use relayd_net_rcmgr::{ResourceBehaviour, ResourceManager};
use relayd_net_routing::{RoutingConfig, build_kad};

use crate::{AGENT_VERSION, PROTOCOL_VERSION};

/// Behaviours of the relay host.
///
/// `rcmgr` comes first so connections without room are denied before any
/// other behaviour sets up state for them.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "RelayNodeEvent")]
pub struct RelayNodeBehaviour {
    pub rcmgr: ResourceBehaviour,
    pub connmgr: ConnManagerBehaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub kad: kad::Behaviour<MemoryStore>,
    /// Off until the relay service is enabled.
    pub relay: Toggle<relay::Behaviour>,
}

impl RelayNodeBehaviour {
    pub fn new(
        local_public_key: PublicKey,
        rcmgr: ResourceManager,
        connmgr: Arc<ConnManager>,
        routing: &RoutingConfig,
    ) -> Self {
        let local_peer_id = local_public_key.to_peer_id();
        Self {
            rcmgr: ResourceBehaviour::new(rcmgr),
            connmgr: ConnManagerBehaviour::new(connmgr),
            identify: identify::Behaviour::new(
                identify::Config::new(PROTOCOL_VERSION.to_string(), local_public_key)
                    .with_agent_version(AGENT_VERSION.to_string())
                    .with_hide_listen_addrs(true),
            ),
            ping: ping::Behaviour::default(),
            kad: build_kad(local_peer_id, routing),
            relay: Toggle::from(None),
        }
    }
}

/// Events from the relay host behaviours.
#[derive(Debug)]
pub enum RelayNodeEvent {
    Identify(Box<identify::Event>),
    Ping(ping::Event),
    Kad(Box<kad::Event>),
    Relay(Box<relay::Event>),
}

impl From<Infallible> for RelayNodeEvent {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<identify::Event> for RelayNodeEvent {
    fn from(event: identify::Event) -> Self {
        Self::Identify(Box::new(event))
    }
}

impl From<ping::Event> for RelayNodeEvent {
    fn from(event: ping::Event) -> Self {
        Self::Ping(event)
    }
}

impl From<kad::Event> for RelayNodeEvent {
    fn from(event: kad::Event) -> Self {
        Self::Kad(Box::new(event))
    }
}

impl From<relay::Event> for RelayNodeEvent {
    fn from(event: relay::Event) -> Self {
        Self::Relay(Box::new(event))
    }
}
