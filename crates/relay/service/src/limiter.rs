//! Relay rate-limiter hooks backed by the admission gate.

use std::sync::Arc;

use libp2p::{Multiaddr, PeerId, relay};
use web_time::Instant;

use crate::gate::RelayGate;

pub(crate) struct ReservationLimiter {
    pub(crate) gate: Arc<RelayGate>,
}

impl relay::RateLimiter for ReservationLimiter {
    fn try_next(&mut self, peer: PeerId, addr: &Multiaddr, _now: Instant) -> bool {
        self.gate.admit_reservation(peer, addr).is_ok()
    }
}

pub(crate) struct CircuitLimiter {
    pub(crate) gate: Arc<RelayGate>,
}

impl relay::RateLimiter for CircuitLimiter {
    fn try_next(&mut self, peer: PeerId, addr: &Multiaddr, _now: Instant) -> bool {
        self.gate.admit_circuit(peer, addr).is_ok()
    }
}
