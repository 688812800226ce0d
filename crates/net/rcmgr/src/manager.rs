//! Scope tree and reservation guards.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use libp2p::{PeerId, core::Endpoint};
use tracing::{debug, trace};

use crate::{
    error::ResourceError,
    limits::{ResolvedLimits, ResourceManagerConfig},
    metrics::record_blocked,
    scope::{Scope, ScopeKind, Usage},
};

/// Shared handle to the scope tree.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: ResolvedLimits,
    system: Arc<Scope>,
    transient: Arc<Scope>,
    peers: DashMap<PeerId, Arc<Scope>>,
    protocols: DashMap<String, Arc<Scope>>,
    closed: AtomicBool,
}

impl ResourceManager {
    /// Build from configuration, auto-scaling against the host's memory.
    pub fn new(config: &ResourceManagerConfig) -> Self {
        Self::with_limits(config.resolve())
    }

    pub fn with_limits(limits: ResolvedLimits) -> Self {
        debug!(
            system_conns = limits.system.conns,
            system_streams = limits.system.streams,
            system_memory = limits.system.memory,
            system_fds = limits.system.fds,
            "resource manager limits"
        );
        Self {
            inner: Arc::new(Inner {
                system: Arc::new(Scope::new(ScopeKind::System, limits.system)),
                transient: Arc::new(Scope::new(ScopeKind::Transient, limits.transient)),
                peers: DashMap::new(),
                protocols: DashMap::new(),
                closed: AtomicBool::new(false),
                limits,
            }),
        }
    }

    pub fn limits(&self) -> &ResolvedLimits {
        &self.inner.limits
    }

    /// Reserve a new connection in the transient scope.
    ///
    /// The connection moves to its peer scope via
    /// [`ConnectionScope::set_peer`] once the remote identity is known.
    pub fn open_connection(
        &self,
        endpoint: Endpoint,
        uses_fd: bool,
    ) -> Result<ConnectionScope, ResourceError> {
        let usage = Usage::connection(endpoint, uses_fd);
        let conn = Arc::new(Scope::new(ScopeKind::Connection, self.inner.limits.conn));
        let reservation = self.reserve_chain(
            vec![
                conn,
                self.inner.transient.clone(),
                self.inner.system.clone(),
            ],
            usage,
        )?;
        Ok(ConnectionScope {
            manager: self.clone(),
            reservation,
            peer: None,
        })
    }

    /// Reserve one stream for `protocol` with `peer`, plus `memory` bytes.
    ///
    /// Charged to the peer, protocol and system scopes. Callers that accept
    /// streams themselves reserve here; see the crate docs for coverage.
    pub fn reserve_stream(
        &self,
        peer: PeerId,
        protocol: &str,
        endpoint: Endpoint,
        memory: u64,
    ) -> Result<ScopeReservation, ResourceError> {
        let usage = Usage::stream(endpoint).with_memory(memory);
        let scopes = vec![
            self.peer_scope(peer),
            self.protocol_scope(protocol),
            self.inner.system.clone(),
        ];
        self.reserve_chain(scopes, usage)
    }

    pub fn system_usage(&self) -> Usage {
        self.inner.system.usage()
    }

    pub fn transient_usage(&self) -> Usage {
        self.inner.transient.usage()
    }

    pub fn peer_usage(&self, peer: &PeerId) -> Option<Usage> {
        self.inner.peers.get(peer).map(|scope| scope.usage())
    }

    pub fn protocol_usage(&self, protocol: &str) -> Option<Usage> {
        self.inner.protocols.get(protocol).map(|scope| scope.usage())
    }

    /// Drop idle peer and protocol scopes nobody holds. Returns how many
    /// were removed.
    pub fn gc(&self) -> usize {
        // Handles are cloned under the shard lock, so a count of one while
        // holding that lock means no reservation can reach the scope.
        let idle = |scope: &Arc<Scope>| Arc::strong_count(scope) == 1 && scope.is_idle();
        let before = self.inner.peers.len() + self.inner.protocols.len();
        self.inner.peers.retain(|_, scope| !idle(scope));
        self.inner.protocols.retain(|_, scope| !idle(scope));
        let removed = before.saturating_sub(self.inner.peers.len() + self.inner.protocols.len());
        if removed > 0 {
            trace!(removed, "collected idle scopes");
        }
        removed
    }

    /// Refuse all new reservations. Existing guards still release normally.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("resource manager closed");
        }
    }

    fn peer_scope(&self, peer: PeerId) -> Arc<Scope> {
        let limits = self.inner.limits.peer;
        self.inner
            .peers
            .entry(peer)
            .or_insert_with(|| Arc::new(Scope::new(ScopeKind::Peer, limits)))
            .clone()
    }

    fn protocol_scope(&self, protocol: &str) -> Arc<Scope> {
        if let Some(scope) = self.inner.protocols.get(protocol) {
            return scope.clone();
        }
        let limits = self.inner.limits.protocol;
        self.inner
            .protocols
            .entry(protocol.to_owned())
            .or_insert_with(|| Arc::new(Scope::new(ScopeKind::Protocol, limits)))
            .clone()
    }

    fn reserve_chain(
        &self,
        scopes: Vec<Arc<Scope>>,
        usage: Usage,
    ) -> Result<ScopeReservation, ResourceError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ResourceError::Closed);
        }
        for (i, scope) in scopes.iter().enumerate() {
            if let Err(resource) = scope.try_reserve(&usage) {
                for charged in scopes.iter().take(i) {
                    charged.release(&usage);
                }
                let kind = scope.kind();
                record_blocked(kind, resource);
                debug!(scope = %kind, %resource, "resource reservation blocked");
                return Err(ResourceError::LimitExceeded {
                    scope: kind,
                    resource,
                });
            }
        }
        Ok(ScopeReservation { scopes, usage })
    }
}

/// Usage charged to a chain of scopes. Released on drop.
#[derive(Debug)]
pub struct ScopeReservation {
    scopes: Vec<Arc<Scope>>,
    usage: Usage,
}

impl ScopeReservation {
    pub fn usage(&self) -> Usage {
        self.usage
    }
}

impl Drop for ScopeReservation {
    fn drop(&mut self) {
        for scope in &self.scopes {
            scope.release(&self.usage);
        }
    }
}

/// Reservation held for the lifetime of one connection.
#[derive(Debug)]
pub struct ConnectionScope {
    manager: ResourceManager,
    reservation: ScopeReservation,
    peer: Option<PeerId>,
}

impl ConnectionScope {
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    /// Move the connection from the transient scope into `peer`'s scope.
    ///
    /// Fails if the peer scope is at its ceiling; the connection stays
    /// transient in that case and should be refused.
    pub fn set_peer(&mut self, peer: PeerId) -> Result<(), ResourceError> {
        if self.peer.is_some() {
            return Ok(());
        }
        let usage = self.reservation.usage;
        let peer_scope = self.manager.peer_scope(peer);
        if let Err(resource) = peer_scope.try_reserve(&usage) {
            record_blocked(ScopeKind::Peer, resource);
            debug!(%peer, %resource, "peer scope blocked connection");
            return Err(ResourceError::LimitExceeded {
                scope: ScopeKind::Peer,
                resource,
            });
        }
        if let Some(slot) = self
            .reservation
            .scopes
            .iter_mut()
            .find(|s| s.kind() == ScopeKind::Transient)
        {
            let transient = std::mem::replace(slot, peer_scope);
            transient.release(&usage);
        }
        self.peer = Some(peer);
        Ok(())
    }
}
