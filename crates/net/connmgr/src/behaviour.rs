//! Swarm adapter for [`ConnManager`].

use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use libp2p::{
    Multiaddr, PeerId,
    core::{Endpoint, transport::PortUse},
    swarm::{
        CloseConnection, ConnectionDenied, ConnectionId, FromSwarm, NetworkBehaviour, THandler,
        THandlerInEvent, THandlerOutEvent, ToSwarm, dummy,
    },
};
use tracing::debug;

use crate::manager::{ConnManager, Direction};

/// Feeds connection lifecycle events into a shared [`ConnManager`] and closes
/// the connections it selects for pruning.
///
/// Never denies a connection.
pub struct ConnManagerBehaviour {
    manager: Arc<ConnManager>,
    pending_close: VecDeque<(PeerId, ConnectionId)>,
    waker: Option<Waker>,
}

impl ConnManagerBehaviour {
    pub fn new(manager: Arc<ConnManager>) -> Self {
        Self {
            manager,
            pending_close: VecDeque::new(),
            waker: None,
        }
    }

    pub fn manager(&self) -> &Arc<ConnManager> {
        &self.manager
    }

    /// Run a pruning pass and schedule the selected connections for closing.
    ///
    /// Returns the number of connections scheduled.
    pub fn trim(&mut self) -> usize {
        let selected = self.manager.trim();
        let n = selected.len();
        if n > 0 {
            self.pending_close.extend(selected);
            if let Some(waker) = self.waker.take() {
                waker.wake();
            }
        }
        n
    }
}

impl NetworkBehaviour for ConnManagerBehaviour {
    type ConnectionHandler = dummy::ConnectionHandler;
    type ToSwarm = Infallible;

    fn handle_established_inbound_connection(
        &mut self,
        _connection_id: ConnectionId,
        _peer: PeerId,
        _local_addr: &Multiaddr,
        _remote_addr: &Multiaddr,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        Ok(dummy::ConnectionHandler)
    }

    fn handle_established_outbound_connection(
        &mut self,
        _connection_id: ConnectionId,
        _peer: PeerId,
        _addr: &Multiaddr,
        _role_override: Endpoint,
        _port_use: PortUse,
    ) -> Result<THandler<Self>, ConnectionDenied> {
        Ok(dummy::ConnectionHandler)
    }

    fn on_swarm_event(&mut self, event: FromSwarm) {
        match event {
            FromSwarm::ConnectionEstablished(established) => {
                let direction = if established.endpoint.is_dialer() {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                };
                self.manager
                    .connected(established.connection_id, established.peer_id, direction);
                if self.manager.needs_trim() {
                    self.trim();
                }
            }
            FromSwarm::ConnectionClosed(closed) => {
                self.manager.disconnected(closed.connection_id);
                self.pending_close
                    .retain(|(_, id)| *id != closed.connection_id);
            }
            _ => {}
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
        cx: &mut Context<'_>,
    ) -> Poll<ToSwarm<Self::ToSwarm, THandlerInEvent<Self>>> {
        if let Some((peer_id, connection_id)) = self.pending_close.pop_front() {
            debug!(%peer_id, ?connection_id, "closing pruned connection");
            return Poll::Ready(ToSwarm::CloseConnection {
                peer_id,
                connection: CloseConnection::One(connection_id),
            });
        }
        self.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
