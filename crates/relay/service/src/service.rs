//! Relay enablement and lifecycle.

use std::sync::Arc;

use libp2p::{PeerId, relay};
use relayd_net_connmgr::ConnManager;
use relayd_net_rcmgr::ResourceManager;
use relayd_relay_acl::Acl;
use tracing::{debug, info};
use web_time::Instant;

use crate::{
    config::RelayResources,
    error::RelayError,
    gate::RelayGate,
    limiter::{CircuitLimiter, ReservationLimiter},
};

/// Relay service configuration: an on/off switch and resource bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayService {
    pub enabled: bool,
    pub resources: RelayResources,
}

impl Default for RelayService {
    fn default() -> Self {
        Self {
            enabled: true,
            resources: RelayResources::default(),
        }
    }
}

impl RelayService {
    /// Build the relay protocol behaviour wired to the admission gate.
    ///
    /// Fails with [`RelayError::Disabled`] when the switch is off, so the
    /// caller cannot start a relay by accident.
    pub fn enable(
        &self,
        local_peer_id: PeerId,
        acl: Arc<Acl>,
        rcmgr: ResourceManager,
        connmgr: Arc<ConnManager>,
    ) -> Result<(relay::Behaviour, RelayHandle), RelayError> {
        if !self.enabled {
            return Err(RelayError::Disabled);
        }
        let resources = &self.resources;
        resources.validate()?;

        let gate = Arc::new(RelayGate::new(acl, rcmgr, connmgr, resources.clone()));
        let config = relay::Config {
            max_reservations: resources.max_reservations,
            max_reservations_per_peer: resources.max_reservations_per_peer,
            reservation_duration: resources.reservation_ttl,
            reservation_rate_limiters: vec![Box::new(ReservationLimiter { gate: gate.clone() })],
            max_circuits: resources
                .max_circuits
                .saturating_mul(resources.max_reservations),
            max_circuits_per_peer: resources.max_circuits,
            max_circuit_duration: resources.limit_duration,
            max_circuit_bytes: resources.limit_data,
            circuit_src_rate_limiters: vec![Box::new(CircuitLimiter { gate: gate.clone() })],
        };
        info!(
            max_reservations = resources.max_reservations,
            max_circuits = resources.max_circuits,
            reservation_ttl = ?resources.reservation_ttl,
            "relay service enabled"
        );
        Ok((relay::Behaviour::new(local_peer_id, config), RelayHandle { gate }))
    }
}

/// Handle to a running relay service.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    gate: Arc<RelayGate>,
}

impl RelayHandle {
    pub fn gate(&self) -> &Arc<RelayGate> {
        &self.gate
    }

    /// Apply a relay protocol outcome to the admission state.
    #[allow(deprecated)]
    pub fn on_event(&self, event: &relay::Event) {
        match event {
            relay::Event::ReservationReqAccepted {
                src_peer_id,
                renewed,
            } => self.gate.reservation_accepted(*src_peer_id, *renewed),
            relay::Event::ReservationReqAcceptFailed { src_peer_id, error } => {
                debug!(peer = %src_peer_id, %error, "reservation acceptance failed");
                self.gate.reservation_failed(*src_peer_id)
            }
            relay::Event::ReservationReqDenied { src_peer_id, .. } => {
                self.gate.reservation_denied(*src_peer_id)
            }
            relay::Event::ReservationTimedOut { src_peer_id }
            | relay::Event::ReservationClosed { src_peer_id } => {
                self.gate.reservation_ended(*src_peer_id)
            }
            relay::Event::CircuitReqAccepted {
                src_peer_id,
                dst_peer_id,
            } => self.gate.circuit_accepted(*src_peer_id, *dst_peer_id),
            relay::Event::CircuitReqDenied {
                src_peer_id,
                status,
                ..
            } => self.gate.circuit_denied(*src_peer_id, status),
            relay::Event::CircuitReqAcceptFailed { src_peer_id, error, .. } => {
                debug!(peer = %src_peer_id, %error, "circuit acceptance failed");
                self.gate.circuit_failed(*src_peer_id)
            }
            relay::Event::CircuitClosed {
                src_peer_id,
                dst_peer_id,
                ..
            } => self.gate.circuit_closed(*src_peer_id, *dst_peer_id),
            other => debug!(event = ?other, "relay event"),
        }
    }

    /// All connections to `peer` closed.
    pub fn peer_disconnected(&self, peer: PeerId) {
        self.gate.peer_disconnected(peer);
    }

    /// Periodic housekeeping.
    pub fn tick(&self) {
        self.gate.expire_pending(Instant::now());
    }

    /// Stop admitting requests and release held permits. Idempotent.
    pub fn stop(&self) {
        if !self.gate.is_closed() {
            info!(
                reservations = self.gate.reservation_count(),
                circuits = self.gate.circuit_count(),
                "stopping relay service"
            );
        }
        self.gate.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.gate.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use libp2p::identity::Keypair;
    use relayd_net_connmgr::ConnManagerConfig;
    use relayd_net_rcmgr::ResourceManagerConfig;
    use relayd_relay_acl::AclConfig;

    use super::*;

    fn deps() -> (Arc<Acl>, ResourceManager, Arc<ConnManager>) {
        let connmgr = Arc::new(ConnManager::new(ConnManagerConfig::default()).unwrap());
        let acl = Arc::new(Acl::new(AclConfig::default(), connmgr.clone()));
        let rcmgr = ResourceManager::new(&ResourceManagerConfig::default());
        (acl, rcmgr, connmgr)
    }

    fn local() -> PeerId {
        Keypair::generate_ed25519().public().to_peer_id()
    }

    #[test]
    fn disabled_service_refuses_to_enable() {
        let (acl, rcmgr, connmgr) = deps();
        let service = RelayService {
            enabled: false,
            ..Default::default()
        };
        assert_matches!(
            service.enable(local(), acl, rcmgr, connmgr).map(|_| ()),
            Err(RelayError::Disabled)
        );
    }

    #[test]
    fn invalid_resources_are_rejected() {
        let (acl, rcmgr, connmgr) = deps();
        let service = RelayService {
            enabled: true,
            resources: RelayResources {
                buffer_size: 0,
                ..Default::default()
            },
        };
        assert_matches!(
            service.enable(local(), acl, rcmgr, connmgr).map(|_| ()),
            Err(RelayError::InvalidResource {
                field: "bufferSize"
            })
        );
    }

    #[test]
    fn events_drive_permits_and_stop_is_idempotent() {
        let (acl, rcmgr, connmgr) = deps();
        let (_behaviour, handle) = RelayService::default()
            .enable(local(), acl, rcmgr.clone(), connmgr.clone())
            .unwrap();
        let peer = local();
        let addr = "/ip4/34.120.1.1/tcp/4001".parse().unwrap();

        handle.gate().admit_reservation(peer, &addr).unwrap();
        handle.on_event(&relay::Event::ReservationReqAccepted {
            src_peer_id: peer,
            renewed: false,
        });
        assert!(connmgr.is_protected(&peer));
        assert_eq!(rcmgr.system_usage().streams, 1);

        handle.gate().admit_reservation(peer, &addr).unwrap();
        handle.on_event(&relay::Event::ReservationReqAccepted {
            src_peer_id: peer,
            renewed: false,
        });
        assert_eq!(handle.gate().reservation_count(), 2);

        handle.on_event(&relay::Event::ReservationTimedOut { src_peer_id: peer });
        assert!(connmgr.is_protected(&peer));
        handle.on_event(&relay::Event::ReservationClosed { src_peer_id: peer });
        assert!(!connmgr.is_protected(&peer));
        assert!(rcmgr.system_usage().is_zero());

        handle.gate().admit_circuit(peer, &addr).unwrap();
        handle.on_event(&relay::Event::CircuitReqDenied {
            src_peer_id: peer,
            dst_peer_id: local(),
            status: relay::StatusCode::NoReservation,
        });
        assert!(rcmgr.system_usage().is_zero());

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        assert!(handle.gate().admit_reservation(peer, &addr).is_err());
    }
}
