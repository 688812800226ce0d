use std::{sync::Arc, time::Duration};

use eyre::{Result, WrapErr};
use futures::StreamExt;
use libp2p::{
    Multiaddr, PeerId, Swarm, SwarmBuilder,
    identify,
    identity::Keypair,
    multiaddr::Protocol,
    core::transport::ListenerId,
    swarm::SwarmEvent,
};
use relayd_identity::NetworkSecret;
use relayd_net_connmgr::ConnManager;
use relayd_net_local::{AddressChange, AnnouncedAddrs};
use relayd_net_rcmgr::ResourceManager;
use relayd_net_routing::{KAD_PROTOCOL, RoutingBootstrap, RoutingConfig, RoutingHandle};
use relayd_relay_acl::{Acl, ConnectionView};
use relayd_relay_service::{RelayError, RelayHandle, RelayService};
use relayd_tasks::Shutdown;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use web_time::Instant;

use crate::{
    behaviour::{RelayNodeBehaviour, RelayNodeEvent},
    config::HostConfig,
    transport::build_transport,
};

/// A libp2p host serving as a circuit relay.
pub struct RelayHost {
    swarm: Swarm<RelayNodeBehaviour>,
    connmgr: Arc<ConnManager>,
    rcmgr: ResourceManager,
    addrs: AnnouncedAddrs,
    listeners: Vec<ListenerId>,
    routing_config: RoutingConfig,
    routing: Option<RoutingBootstrap>,
    routing_handle: Option<RoutingHandle>,
    relay: Option<RelayHandle>,
    tick_interval: Duration,
    /// Announced set last printed to the operator.
    reported: Option<Vec<Multiaddr>>,
    stopped: bool,
}

impl RelayHost {
    /// Build the swarm and bind every listen address.
    ///
    /// Nothing is dialed or accepted until [`RelayHost::run`] polls the swarm.
    pub fn build(keypair: Keypair, config: HostConfig) -> Result<Self> {
        let HostConfig {
            listen_addrs,
            address_policy,
            connmgr,
            resources,
            routing,
            network_secret,
            idle_timeout,
        } = config;

        let tick_interval = connmgr.trim_interval;
        let connmgr = Arc::new(ConnManager::new(connmgr).wrap_err("invalid connection manager")?);
        let rcmgr = ResourceManager::new(&resources);
        let psk = network_secret.map(|NetworkSecret { key, .. }| key);

        let behaviour_connmgr = connmgr.clone();
        let behaviour_rcmgr = rcmgr.clone();
        let behaviour_routing = routing.clone();

        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_other_transport(|keypair| build_transport(keypair, psk))
            .wrap_err("failed to build transport")?
            .with_dns()
            .wrap_err("failed to configure DNS resolution")?
            .with_behaviour(|keypair| {
                RelayNodeBehaviour::new(
                    keypair.public(),
                    behaviour_rcmgr,
                    behaviour_connmgr,
                    &behaviour_routing,
                )
            })
            .wrap_err("failed to build behaviour")?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
            .build();

        let mut listeners = Vec::with_capacity(listen_addrs.len());
        for addr in listen_addrs {
            let id = swarm
                .listen_on(addr.clone())
                .wrap_err_with(|| format!("failed to listen on {addr}"))?;
            debug!(%addr, "listening");
            listeners.push(id);
        }

        info!(peer_id = %swarm.local_peer_id(), "relay host built");

        Ok(Self {
            swarm,
            connmgr,
            rcmgr,
            addrs: AnnouncedAddrs::new(address_policy),
            listeners,
            routing_config: routing,
            routing: None,
            routing_handle: None,
            relay: None,
            tick_interval,
            reported: None,
            stopped: false,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    pub fn connmgr(&self) -> &Arc<ConnManager> {
        &self.connmgr
    }

    pub fn rcmgr(&self) -> &ResourceManager {
        &self.rcmgr
    }

    /// Live connection counts for ACL rules.
    pub fn connection_view(&self) -> Arc<dyn ConnectionView> {
        self.connmgr.clone()
    }

    /// Currently announced addresses.
    pub fn announced_addrs(&self) -> &[Multiaddr] {
        self.addrs.announced()
    }

    /// Trigger the routing bootstrap. Calling again returns the same handle.
    pub fn start_routing(&mut self) -> Result<RoutingHandle> {
        if let Some(handle) = &self.routing_handle {
            return Ok(handle.clone());
        }

        let (mut routing, handle) = RoutingBootstrap::new(self.routing_config.clone())
            .wrap_err("invalid bootstrap peers")?;
        routing.start(&mut self.swarm.behaviour_mut().kad);

        self.routing = Some(routing);
        self.routing_handle = Some(handle.clone());
        Ok(handle)
    }

    /// Switch on the relay protocol, admitting requests through `acl`.
    ///
    /// Returns `None` when the service is disabled in configuration.
    pub fn enable_relay(
        &mut self,
        service: &RelayService,
        acl: Arc<Acl>,
    ) -> Result<Option<RelayHandle>> {
        if !service.enabled {
            info!("relay service disabled");
            return Ok(None);
        }
        if self.relay.is_some() {
            return Err(RelayError::AlreadyEnabled.into());
        }

        info!("starting relay service");
        let (behaviour, handle) = service.enable(
            self.local_peer_id(),
            acl,
            self.rcmgr.clone(),
            self.connmgr.clone(),
        )?;
        self.swarm.behaviour_mut().relay = Some(behaviour).into();
        self.relay = Some(handle.clone());
        info!("relay service running");
        Ok(Some(handle))
    }

    /// Drive the host until `shutdown` fires, then stop every component.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<()> {
        // Static announce addresses are known up front. They are published
        // only now so the relay behaviour, if enabled, sees them too.
        let initial = AddressChange {
            added: self.addrs.announced().to_vec(),
            removed: Vec::new(),
        };
        self.apply_address_change(initial);
        println!("I am {}", self.local_peer_id());
        if self.addrs.policy().is_static() {
            self.report_addresses();
        }

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                _ = tick.tick() => self.on_tick(),
                _ = retry_requested(self.routing.as_mut()) => {
                    if let Some(routing) = self.routing.as_mut() {
                        routing.retry(&mut self.swarm.behaviour_mut().kad);
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        self.stop();
        Ok(())
    }

    /// Stop relay, routing, connection manager and host, in that order.
    ///
    /// Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("stopping relay host");

        if let Some(relay) = &self.relay {
            relay.stop();
        }
        if let Some(routing) = self.routing.as_mut() {
            routing.stop(&mut self.swarm.behaviour_mut().kad);
        }
        self.connmgr.close();
        self.rcmgr.close();

        for id in self.listeners.drain(..) {
            self.swarm.remove_listener(id);
        }
        let peers: Vec<PeerId> = self.swarm.connected_peers().copied().collect();
        for peer in peers {
            let _ = self.swarm.disconnect_peer_id(peer);
        }
        info!("relay host stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Announced set as last reported to the operator, if any.
    pub fn reported_addrs(&self) -> Option<&[Multiaddr]> {
        self.reported.as_deref()
    }

    /// Print the announced set once known, and again whenever it changes.
    fn report_addresses(&mut self) {
        let announced = self.addrs.announced().to_vec();
        if self.reported.as_ref() == Some(&announced) {
            return;
        }
        let peer_id = self.local_peer_id();
        println!("Public Addresses:");
        for addr in &announced {
            println!("\t{addr}/p2p/{peer_id}");
        }
        info!(count = announced.len(), "announced addresses updated");
        self.reported = Some(announced);
    }

    fn apply_address_change(&mut self, change: AddressChange) {
        for addr in change.removed {
            info!(%addr, "no longer announcing address");
            self.swarm.remove_external_address(&addr);
        }
        for addr in change.added {
            info!(%addr, "announcing address");
            self.swarm.add_external_address(addr);
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let behaviour = self.swarm.behaviour_mut();

        let pruned = behaviour.connmgr.trim();
        let collected = self.rcmgr.gc();
        if pruned > 0 || collected > 0 {
            debug!(pruned, collected, "housekeeping");
        }

        if let Some(relay) = &self.relay {
            relay.tick();
        }
        if let Some(routing) = self.routing.as_mut() {
            routing.on_tick(&mut behaviour.kad, now);
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<RelayNodeEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let change = self.addrs.add_candidate(address);
                self.apply_address_change(change);
                self.report_addresses();
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                let change = self.addrs.remove_candidate(&address);
                self.apply_address_change(change);
                self.report_addresses();
            }
            SwarmEvent::ListenerClosed {
                addresses, reason, ..
            } => {
                debug!(?reason, "listener closed");
                for address in addresses {
                    let change = self.addrs.remove_candidate(&address);
                    self.apply_address_change(change);
                }
                self.report_addresses();
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!(%error, "listener error");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                trace!(%peer_id, addr = %endpoint.get_remote_address(), "connection established");
                if let Some(routing) = self.routing.as_mut() {
                    routing.peer_connected(peer_id);
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                trace!(%peer_id, ?cause, "connection closed");
                if num_established == 0 {
                    if let Some(routing) = self.routing.as_mut() {
                        routing.peer_disconnected(&peer_id);
                    }
                    if let Some(relay) = &self.relay {
                        relay.peer_disconnected(peer_id);
                    }
                }
            }
            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => {
                debug!(addr = %send_back_addr, %error, "incoming connection failed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                trace!(?peer_id, %error, "outgoing connection failed");
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: RelayNodeEvent) {
        match event {
            RelayNodeEvent::Identify(event) => self.handle_identify_event(*event),
            RelayNodeEvent::Ping(event) => {
                trace!(peer_id = %event.peer, result = ?event.result, "ping");
            }
            RelayNodeEvent::Kad(event) => {
                if let Some(routing) = self.routing.as_mut() {
                    routing.on_event(&mut self.swarm.behaviour_mut().kad, &event);
                }
            }
            RelayNodeEvent::Relay(event) => {
                debug!(?event, "relay event");
                if let Some(relay) = &self.relay {
                    relay.on_event(&event);
                }
            }
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        match event {
            identify::Event::Received { peer_id, info, .. } => {
                debug!(
                    %peer_id,
                    agent_version = %info.agent_version,
                    "received identify info"
                );
                if info.protocols.contains(&KAD_PROTOCOL) {
                    let kad = &mut self.swarm.behaviour_mut().kad;
                    for addr in info.listen_addrs {
                        kad.add_address(&peer_id, strip_peer_id(addr));
                    }
                }
            }
            identify::Event::Error { peer_id, error, .. } => {
                debug!(%peer_id, %error, "identify error");
            }
            _ => {}
        }
    }
}

/// Wait for an operator retry request, or forever if routing never started.
async fn retry_requested(routing: Option<&mut RoutingBootstrap>) {
    match routing {
        Some(routing) => routing.retry_requested().await,
        None => std::future::pending().await,
    }
}

fn strip_peer_id(mut addr: Multiaddr) -> Multiaddr {
    if matches!(addr.iter().last(), Some(Protocol::P2p(_))) {
        addr.pop();
    }
    addr
}
