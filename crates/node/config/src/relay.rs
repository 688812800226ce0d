use std::time::Duration;

use relayd_relay_service::{RelayResources, RelayService};
use serde::{Deserialize, Serialize};

use crate::Extra;

/// Circuit relay v2 switch and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayV2Config {
    #[serde(alias = "Enabled")]
    pub enabled: bool,
    #[serde(alias = "Resources")]
    pub resources: RelayResourcesConfig,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl Default for RelayV2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            resources: RelayResourcesConfig::default(),
            extra: Extra::new(),
        }
    }
}

impl RelayV2Config {
    /// Zero values are rejected later, when the relay is enabled.
    pub fn to_relay_service(&self) -> RelayService {
        RelayService {
            enabled: self.enabled,
            resources: self.resources.to_relay_resources(),
        }
    }
}

/// Per-circuit limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayLimitConfig {
    #[serde(alias = "Duration", with = "crate::serde_duration")]
    pub duration: Duration,
    /// Bytes relayed per direction.
    #[serde(alias = "Data")]
    pub data: u64,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

/// Reservation and circuit bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayResourcesConfig {
    #[serde(alias = "Limit")]
    pub limit: RelayLimitConfig,
    #[serde(
        rename = "reservationTTL",
        alias = "ReservationTTL",
        with = "crate::serde_duration"
    )]
    pub reservation_ttl: Duration,
    #[serde(alias = "MaxReservations")]
    pub max_reservations: usize,
    #[serde(alias = "MaxCircuits")]
    pub max_circuits: usize,
    #[serde(alias = "BufferSize")]
    pub buffer_size: usize,
    #[serde(alias = "MaxReservationsPerPeer")]
    pub max_reservations_per_peer: usize,
    #[serde(rename = "maxReservationsPerIP", alias = "MaxReservationsPerIP")]
    pub max_reservations_per_ip: usize,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl Default for RelayLimitConfig {
    fn default() -> Self {
        let defaults = RelayResources::default();
        Self {
            duration: defaults.limit_duration,
            data: defaults.limit_data,
            extra: Extra::new(),
        }
    }
}

impl Default for RelayResourcesConfig {
    fn default() -> Self {
        let defaults = RelayResources::default();
        Self {
            limit: RelayLimitConfig::default(),
            reservation_ttl: defaults.reservation_ttl,
            max_reservations: defaults.max_reservations,
            max_circuits: defaults.max_circuits,
            buffer_size: defaults.buffer_size,
            max_reservations_per_peer: defaults.max_reservations_per_peer,
            max_reservations_per_ip: defaults.max_reservations_per_ip,
            extra: Extra::new(),
        }
    }
}

impl RelayResourcesConfig {
    pub fn to_relay_resources(&self) -> RelayResources {
        RelayResources {
            limit_duration: self.limit.duration,
            limit_data: self.limit.data,
            reservation_ttl: self.reservation_ttl,
            max_reservations: self.max_reservations,
            max_circuits: self.max_circuits,
            buffer_size: self.buffer_size,
            max_reservations_per_peer: self.max_reservations_per_peer,
            max_reservations_per_ip: self.max_reservations_per_ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_relay_defaults() {
        let service = RelayV2Config::default().to_relay_service();
        assert_eq!(service, RelayService::default());
    }

    #[test]
    fn durations_serialize_readably() {
        let json = serde_json::to_value(RelayResourcesConfig::default()).unwrap();
        assert_eq!(json["reservationTTL"], "1h");
        assert_eq!(json["limit"]["duration"], "2m");
        assert_eq!(json["maxReservationsPerIP"], 8);
    }
}
