use std::time::Duration;

use crate::error::RelayError;

/// Bounds on relay usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResources {
    /// Maximum lifetime of a relayed circuit.
    pub limit_duration: Duration,
    /// Maximum bytes relayed per circuit direction.
    pub limit_data: u64,
    /// Lifetime of a reservation.
    pub reservation_ttl: Duration,
    /// Maximum active reservations.
    pub max_reservations: usize,
    /// Maximum concurrent circuits per peer.
    pub max_circuits: usize,
    /// Per-direction buffer size of a circuit, in bytes.
    pub buffer_size: usize,
    /// Maximum reservations per peer.
    pub max_reservations_per_peer: usize,
    /// Maximum reservations per source IP.
    pub max_reservations_per_ip: usize,
}

impl Default for RelayResources {
    fn default() -> Self {
        Self {
            limit_duration: Duration::from_secs(2 * 60),
            limit_data: 1 << 17,
            reservation_ttl: Duration::from_secs(60 * 60),
            max_reservations: 128,
            max_circuits: 16,
            buffer_size: 2048,
            max_reservations_per_peer: 4,
            max_reservations_per_ip: 8,
        }
    }
}

impl RelayResources {
    pub fn validate(&self) -> Result<(), RelayError> {
        let checks: [(&'static str, bool); 8] = [
            ("limit.duration", self.limit_duration.is_zero()),
            ("limit.data", self.limit_data == 0),
            ("reservationTTL", self.reservation_ttl.is_zero()),
            ("maxReservations", self.max_reservations == 0),
            ("maxCircuits", self.max_circuits == 0),
            ("bufferSize", self.buffer_size == 0),
            ("maxReservationsPerPeer", self.max_reservations_per_peer == 0),
            ("maxReservationsPerIP", self.max_reservations_per_ip == 0),
        ];
        match checks.into_iter().find(|(_, invalid)| *invalid) {
            Some((field, _)) => Err(RelayError::InvalidResource { field }),
            None => Ok(()),
        }
    }

    /// Memory reserved for one circuit: a buffer per direction.
    pub fn circuit_memory(&self) -> u64 {
        (self.buffer_size as u64).saturating_mul(2)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RelayResources::default().validate().is_ok());
        assert_eq!(RelayResources::default().circuit_memory(), 4096);
    }

    #[test]
    fn zero_values_are_rejected() {
        let resources = RelayResources {
            max_circuits: 0,
            ..Default::default()
        };
        assert_matches!(
            resources.validate(),
            Err(RelayError::InvalidResource {
                field: "maxCircuits"
            })
        );
    }
}
