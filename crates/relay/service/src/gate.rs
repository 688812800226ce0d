//! Admission gate for relay requests.
//!
//! The relay protocol only exposes a yes/no hook when a request arrives and
//! reports the final outcome later as an event. The gate takes the resource
//! reservation at the hook and keeps it as a pending permit until the event
//! arrives: accepted permits are kept for the life of the reservation or
//! circuit, failed ones are released.
//!
//! Permits of one peer are interchangeable, so events resolve them in
//! arrival order. Only events that can follow an admitted request release a
//! pending permit. The relay runs its own per-peer and global limits before
//! the hook, and those denials never reach the gate:
//!
//! - a reservation that passed the hook is always accepted, or fails while
//!   sending the acceptance; a reservation deny never owns a permit.
//! - a circuit deny with `ResourceLimitExceeded` is the status of every
//!   refusal made before or at the hook, so it never releases a permit.
//!   The rare destination that answers with the same status leaves its
//!   permit to expire.

use std::{
    collections::VecDeque,
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use libp2p::{Multiaddr, PeerId, core::Endpoint, relay::StatusCode};
use relayd_net_connmgr::ConnManager;
use relayd_net_local::extract_ip;
use relayd_net_rcmgr::{ResourceError, ResourceManager, ScopeReservation};
use relayd_relay_acl::{Acl, RelayAction, Verdict};
use tracing::{debug, trace};
use web_time::Instant;

use crate::{HOP_PROTOCOL, RESERVATION_TAG, config::RelayResources};

/// Permits not resolved by the relay within this time are released.
const PENDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a request was refused by the gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("relay service stopped")]
    Closed,
    #[error("denied by ACL")]
    Acl,
    #[error("too many reservations from {0}")]
    PerIpLimit(IpAddr),
    #[error(transparent)]
    Resources(#[from] ResourceError),
}

impl Rejection {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Closed => "denied_closed",
            Self::Acl => "denied_acl",
            Self::PerIpLimit(_) => "denied_ip_limit",
            Self::Resources(_) => "denied_resources",
        }
    }
}

#[derive(Debug)]
struct Permit {
    ip: Option<IpAddr>,
    created_at: Instant,
    _reservation: ScopeReservation,
}

fn record_reservation(outcome: &'static str) {
    metrics::counter!("relayd_relay_reservations_total", "outcome" => outcome).increment(1);
}

fn record_circuit(outcome: &'static str) {
    metrics::counter!("relayd_relay_circuits_total", "outcome" => outcome).increment(1);
}

/// Shared admission state for the relay.
#[derive(Debug)]
pub struct RelayGate {
    acl: Arc<Acl>,
    rcmgr: ResourceManager,
    connmgr: Arc<ConnManager>,
    resources: RelayResources,
    closed: AtomicBool,
    pending_reservations: DashMap<PeerId, VecDeque<Permit>>,
    /// One permit per live reservation, oldest first.
    reservations: DashMap<PeerId, VecDeque<Permit>>,
    pending_circuits: DashMap<PeerId, VecDeque<Permit>>,
    circuits: DashMap<(PeerId, PeerId), Vec<Permit>>,
}

impl RelayGate {
    pub fn new(
        acl: Arc<Acl>,
        rcmgr: ResourceManager,
        connmgr: Arc<ConnManager>,
        resources: RelayResources,
    ) -> Self {
        Self {
            acl,
            rcmgr,
            connmgr,
            resources,
            closed: AtomicBool::new(false),
            pending_reservations: DashMap::new(),
            reservations: DashMap::new(),
            pending_circuits: DashMap::new(),
            circuits: DashMap::new(),
        }
    }

    pub fn resources(&self) -> &RelayResources {
        &self.resources
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Decide whether `peer`, connected from `addr`, may reserve.
    pub fn admit_reservation(&self, peer: PeerId, addr: &Multiaddr) -> Result<(), Rejection> {
        match self.check_reservation(peer, addr) {
            Ok(permit) => {
                self.pending_reservations
                    .entry(peer)
                    .or_default()
                    .push_back(permit);
                Ok(())
            }
            Err(rejection) => {
                record_reservation(rejection.outcome());
                debug!(%peer, %rejection, "reservation refused");
                Err(rejection)
            }
        }
    }

    fn check_reservation(&self, peer: PeerId, addr: &Multiaddr) -> Result<Permit, Rejection> {
        if self.is_closed() {
            return Err(Rejection::Closed);
        }
        let action = RelayAction::Reserve { addr: addr.clone() };
        if self.acl.evaluate(&peer, &action) == Verdict::Deny {
            return Err(Rejection::Acl);
        }
        let ip = extract_ip(addr);
        if let Some(ip) = ip {
            if self.reservations_from(ip, &peer) >= self.resources.max_reservations_per_ip {
                return Err(Rejection::PerIpLimit(ip));
            }
        }
        let reservation = self
            .rcmgr
            .reserve_stream(peer, HOP_PROTOCOL, Endpoint::Listener, 0)?;
        Ok(Permit {
            ip,
            created_at: Instant::now(),
            _reservation: reservation,
        })
    }

    /// Decide whether `src`, connected from `src_addr`, may open a circuit.
    pub fn admit_circuit(&self, src: PeerId, src_addr: &Multiaddr) -> Result<(), Rejection> {
        match self.check_circuit(src, src_addr) {
            Ok(permit) => {
                self.pending_circuits.entry(src).or_default().push_back(permit);
                Ok(())
            }
            Err(rejection) => {
                record_circuit(rejection.outcome());
                debug!(peer = %src, %rejection, "circuit refused");
                Err(rejection)
            }
        }
    }

    fn check_circuit(&self, src: PeerId, src_addr: &Multiaddr) -> Result<Permit, Rejection> {
        if self.is_closed() {
            return Err(Rejection::Closed);
        }
        let action = RelayAction::Connect {
            src_addr: src_addr.clone(),
            dst: None,
        };
        if self.acl.evaluate(&src, &action) == Verdict::Deny {
            return Err(Rejection::Acl);
        }
        let reservation = self.rcmgr.reserve_stream(
            src,
            HOP_PROTOCOL,
            Endpoint::Listener,
            self.resources.circuit_memory(),
        )?;
        Ok(Permit {
            ip: extract_ip(src_addr),
            created_at: Instant::now(),
            _reservation: reservation,
        })
    }

    /// Reservations held or pending from `ip`.
    ///
    /// One reservation `peer` already holds from `ip` is left out, since the
    /// request may be its renewal.
    fn reservations_from(&self, ip: IpAddr, peer: &PeerId) -> usize {
        let mut own = 0;
        let mut confirmed = 0;
        for held in self.reservations.iter() {
            let from_ip = held.iter().filter(|permit| permit.ip == Some(ip)).count();
            if held.key() == peer {
                own = from_ip;
            }
            confirmed += from_ip;
        }
        let pending: usize = self
            .pending_reservations
            .iter()
            .map(|p| p.iter().filter(|permit| permit.ip == Some(ip)).count())
            .sum();
        confirmed + pending - own.min(1)
    }

    /// The relay accepted a reservation from `peer`.
    pub fn reservation_accepted(&self, peer: PeerId, renewed: bool) {
        let permit = take_pending(&self.pending_reservations, &peer);
        if self.is_closed() {
            return;
        }
        match permit {
            Some(permit) => {
                let mut held = self.reservations.entry(peer).or_default();
                // A renewal keeps the count: the fresh permit replaces an old one
                if renewed {
                    held.pop_front();
                }
                held.push_back(permit);
            }
            None => trace!(%peer, renewed, "accepted reservation without pending permit"),
        }
        self.connmgr.protect(peer, RESERVATION_TAG);
        record_reservation(if renewed { "renewed" } else { "accepted" });
        debug!(%peer, renewed, "reservation accepted");
    }

    /// The relay failed to send its acceptance to `peer`.
    pub fn reservation_failed(&self, peer: PeerId) {
        if take_pending(&self.pending_reservations, &peer).is_some() {
            record_reservation("failed");
        }
    }

    /// The relay denied a reservation from `peer`.
    pub fn reservation_denied(&self, peer: PeerId) {
        record_reservation("denied");
        trace!(%peer, "reservation denied by relay");
    }

    /// One reservation of `peer` timed out or its connection closed.
    pub fn reservation_ended(&self, peer: PeerId) {
        let mut ended = false;
        let mut remaining = 0;
        self.reservations.remove_if_mut(&peer, |_, held| {
            ended = held.pop_front().is_some();
            remaining = held.len();
            held.is_empty()
        });
        if ended {
            record_reservation("ended");
        }
        if remaining == 0 {
            self.connmgr.unprotect(&peer, RESERVATION_TAG);
        }
        trace!(%peer, remaining, "reservation ended");
    }

    /// The relay accepted a circuit from `src` to `dst`.
    pub fn circuit_accepted(&self, src: PeerId, dst: PeerId) {
        if let Some(permit) = take_pending(&self.pending_circuits, &src) {
            self.circuits.entry((src, dst)).or_default().push(permit);
        }
        record_circuit("accepted");
        debug!(%src, %dst, "circuit accepted");
    }

    /// The relay denied a circuit from `src` with `status`.
    pub fn circuit_denied(&self, src: PeerId, status: &StatusCode) {
        record_circuit("denied");
        if matches!(status, StatusCode::ResourceLimitExceeded) {
            trace!(%src, "circuit denied before admission");
            return;
        }
        self.circuit_failed(src);
    }

    /// An admitted circuit from `src` could not be established.
    pub fn circuit_failed(&self, src: PeerId) {
        if take_pending(&self.pending_circuits, &src).is_some() {
            trace!(%src, "released circuit permit");
        }
    }

    /// A circuit from `src` to `dst` closed.
    pub fn circuit_closed(&self, src: PeerId, dst: PeerId) {
        self.circuits.remove_if_mut(&(src, dst), |_, permits| {
            permits.pop();
            permits.is_empty()
        });
        record_circuit("closed");
    }

    /// All connections to `peer` are gone.
    pub fn peer_disconnected(&self, peer: PeerId) {
        self.pending_reservations.remove(&peer);
        self.pending_circuits.remove(&peer);
        if self.reservations.remove(&peer).is_some() {
            self.connmgr.unprotect(&peer, RESERVATION_TAG);
            trace!(%peer, "reservations dropped with peer");
        }
    }

    /// Release permits the relay never resolved.
    pub fn expire_pending(&self, now: Instant) -> usize {
        let mut expired = 0;
        for map in [&self.pending_reservations, &self.pending_circuits] {
            map.retain(|_, permits| {
                let before = permits.len();
                permits.retain(|p| now.saturating_duration_since(p.created_at) < PENDING_TIMEOUT);
                expired += before - permits.len();
                !permits.is_empty()
            });
        }
        if expired > 0 {
            debug!(expired, "released unresolved relay permits");
        }
        expired
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.iter().map(|r| r.len()).sum()
    }

    pub fn circuit_count(&self) -> usize {
        self.circuits.iter().map(|c| c.len()).sum()
    }

    /// Refuse all new requests and release every held permit. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let peers: Vec<PeerId> = self.reservations.iter().map(|r| *r.key()).collect();
        for peer in peers {
            self.connmgr.unprotect(&peer, RESERVATION_TAG);
        }
        self.reservations.clear();
        self.pending_reservations.clear();
        self.circuits.clear();
        self.pending_circuits.clear();
        debug!("relay gate closed");
    }
}

fn take_pending(map: &DashMap<PeerId, VecDeque<Permit>>, peer: &PeerId) -> Option<Permit> {
    let mut permit = None;
    map.remove_if_mut(peer, |_, permits| {
        permit = permits.pop_front();
        permits.is_empty()
    });
    permit
}
