//! Swarm adapter enforcing connection limits.

use std::{
    collections::HashMap,
    convert::Infallible,
    task::{Context, Poll},
};

use libp2p::{
    Multiaddr, PeerId,
    core::{Endpoint, transport::PortUse},
    multiaddr::Protocol,
    swarm::{
        ConnectionDenied, ConnectionId, FromSwarm, NetworkBehaviour, THandler, THandlerInEvent,
        THandlerOutEvent, ToSwarm, dummy,
    },
};
use tracing::trace;

use crate::manager::{ConnectionScope, ResourceManager};

/// Denies connections the [`ResourceManager`] has no room for.
///
/// Every pending connection reserves in the transient scope before any
/// protocol runs on it; once the remote peer is known the reservation moves
/// to that peer's scope. The reservation is held until the connection closes.
pub struct ResourceBehaviour {
    manager: ResourceManager,
    connections: HashMap<ConnectionId, ConnectionScope>,
}

impl ResourceBehaviour {
    pub fn new(manager: ResourceManager) -> Self {
        Self {
            manager,
            connections: HashMap::new(),
        }
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    fn open(
        &mut self,
        id: ConnectionId,
        endpoint: Endpoint,
        addr: &Multiaddr,
    ) -> Result<(), ConnectionDenied> {
        let scope = self
            .manager
            .open_connection(endpoint, uses_fd(addr))
            .map_err(ConnectionDenied::new)?;
        self.connections.insert(id, scope);
        Ok(())
    }

    fn establish(
        &mut self,
        id: ConnectionId,
        peer: PeerId,
        endpoint: Endpoint,
        addr: &Multiaddr,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        if !self.connections.contains_key(&id) {
            self.open(id, endpoint, addr)?;
        }
        let Some(scope) = self.connections.get_mut(&id) else {
            return Ok(dummy::ConnectionHandler);
        };
        if let Err(e) = scope.set_peer(peer) {
            self.connections.remove(&id);
            return Err(ConnectionDenied::new(e));
        }
        Ok(dummy::ConnectionHandler)
    }
}

/// Relayed connections ride on an existing connection and hold no socket.
fn uses_fd(addr: &Multiaddr) -> bool {
    !addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

impl NetworkBehaviour for ResourceBehaviour {
    type ConnectionHandler = dummy::ConnectionHandler;
    type ToSwarm = Infallible;

    fn handle_pending_inbound_connection(
        &mut self,
        connection_id: ConnectionId,
        _local_addr: &Multiaddr,
        remote_addr: &Multiaddr,
    ) -> Result<(), ConnectionDenied> {
        self.open(connection_id, Endpoint::Listener, remote_addr)
    }

    fn handle_pending_outbound_connection(
        &mut self,
        connection_id: ConnectionId,
        _maybe_peer: Option<PeerId>,
        addresses: &[Multiaddr],
        _effective_role: Endpoint,
    ) -> Result<Vec<Multiaddr>, ConnectionDenied> {
        let relayed = !addresses.is_empty() && addresses.iter().all(|a| !uses_fd(a));
        let scope = self
            .manager
            .open_connection(Endpoint::Dialer, !relayed)
            .map_err(ConnectionDenied::new)?;
        self.connections.insert(connection_id, scope);
        Ok(Vec::new())
    }

    fn handle_established_inbound_connection(
        &mut self,
        connection_id: ConnectionId,
        peer: PeerId,
        _local_addr: &Multiaddr,
        remote_addr: &Multiaddr,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        self.establish(connection_id, peer, Endpoint::Listener, remote_addr)
    }

    fn handle_established_outbound_connection(
        &mut self,
        connection_id: ConnectionId,
        peer: PeerId,
        addr: &Multiaddr,
        _role_override: Endpoint,
        _port_use: PortUse,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        self.establish(connection_id, peer, Endpoint::Dialer, addr)
    }

    fn on_swarm_event(&mut self, event: FromSwarm) {
        let released = match event {
            FromSwarm::ConnectionClosed(closed) => Some(closed.connection_id),
            FromSwarm::ListenFailure(failure) => Some(failure.connection_id),
            FromSwarm::DialFailure(failure) => Some(failure.connection_id),
            _ => None,
        };
        if let Some(id) = released {
            if self.connections.remove(&id).is_some() {
                trace!(connection_id = ?id, "released connection scope");
            }
        }
    }

    fn on_connection_handler_event(
        &mut self,
        _peer_id: PeerId,
        _connection_id: ConnectionId,
        event: THandlerOutEvent<Self>,
    ) {
        match event {}
    }

    fn poll(
        &mut self,
        _: &mut Context<'_>,
    ) -> Poll<ToSwarm<Self::ToSwarm, THandlerInEvent<Self>>> {
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{Limits, ResolvedLimits};

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    fn behaviour(system_conns: u64) -> ResourceBehaviour {
        ResourceBehaviour::new(ResourceManager::with_limits(ResolvedLimits {
            system: Limits {
                conns: system_conns,
                ..Limits::UNLIMITED
            },
            transient: Limits::UNLIMITED,
            peer: Limits::UNLIMITED,
            protocol: Limits::UNLIMITED,
            conn: Limits::UNLIMITED,
        }))
    }

    #[test]
    fn pending_inbound_denied_at_ceiling() {
        let mut b = behaviour(1);
        let local = addr("/ip4/0.0.0.0/tcp/4001");
        let remote = addr("/ip4/34.120.1.1/tcp/5555");
        assert!(
            b.handle_pending_inbound_connection(ConnectionId::new_unchecked(1), &local, &remote)
                .is_ok()
        );
        assert!(
            b.handle_pending_inbound_connection(ConnectionId::new_unchecked(2), &local, &remote)
                .is_err()
        );
        assert_eq!(b.manager().system_usage().fds, 1);
    }

    #[test]
    fn established_moves_to_peer_scope() {
        let mut b = behaviour(4);
        let local = addr("/ip4/0.0.0.0/tcp/4001");
        let remote = addr("/ip4/34.120.1.1/tcp/5555");
        let id = ConnectionId::new_unchecked(7);
        let peer = libp2p::identity::Keypair::generate_ed25519()
            .public()
            .to_peer_id();

        b.handle_pending_inbound_connection(id, &local, &remote)
            .unwrap();
        assert_eq!(b.manager().transient_usage().conns, 1);
        assert!(
            b.handle_established_inbound_connection(id, peer, &local, &remote)
                .is_ok()
        );
        assert!(b.manager().transient_usage().is_zero());
        assert_eq!(b.manager().peer_usage(&peer).unwrap().conns, 1);
    }

    #[test]
    fn relayed_addresses_hold_no_fd() {
        assert!(uses_fd(&addr("/ip4/34.120.1.1/tcp/4001")));
        let relay = libp2p::identity::Keypair::generate_ed25519()
            .public()
            .to_peer_id();
        let circuit = addr("/ip4/34.120.1.1/tcp/4001")
            .with(Protocol::P2p(relay))
            .with(Protocol::P2pCircuit);
        assert!(!uses_fd(&circuit));
    }
}
