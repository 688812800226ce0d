//! Configuration for relayd.
//!
//! The file is JSON unless its extension is `.toml`. Field names are
//! camelCase, every field is optional and unknown fields are ignored with a
//! warning. The PascalCase names of the original daemon's config
//! (`ConnMgr.ConnMgrLo`, `ACL.AllowPeers`, ...) are accepted as aliases.
//! Durations are human-readable strings such as `"2m"` or `"30s"`, or
//! integer nanoseconds.
//!
//! Each section converts into the plain configuration type of the crate it
//! drives; malformed peer ids, subnets or addresses surface as
//! [`ConfigError`] at that point.

mod acl;
mod connmgr;
mod error;
mod network;
mod relay;
mod resources;
mod routing;
mod serde_duration;

pub use acl::{AclConfig, DefaultVerdict};
pub use connmgr::ConnMgrConfig;
pub use error::ConfigError;
pub use network::NetworkConfig;
pub use relay::{RelayLimitConfig, RelayResourcesConfig, RelayV2Config};
pub use resources::{LimitOverrides, ResourceLimitsConfig};
pub use routing::RoutingConfig;

use std::{collections::BTreeMap, fs, path::Path};

use relayd_identity::SecretFailurePolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Unrecognised keys of one config section.
pub(crate) type Extra = BTreeMap<String, serde_json::Value>;

/// Default Prometheus exporter port.
pub const DEFAULT_PROM_PORT: i32 = 9090;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(alias = "Network")]
    pub network: NetworkConfig,
    #[serde(alias = "ConnMgr")]
    pub conn_mgr: ConnMgrConfig,
    #[serde(alias = "ACL")]
    pub acl: AclConfig,
    #[serde(rename = "relayV2", alias = "RelayV2")]
    pub relay_v2: RelayV2Config,
    pub resources: ResourceLimitsConfig,
    pub routing: RoutingConfig,
    pub security: SecurityConfig,
    #[serde(alias = "Daemon")]
    pub daemon: DaemonConfig,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl RelayConfig {
    /// Load from `path`. An empty path yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            debug!("no config file given, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config: Self = if is_toml {
            toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        };
        for key in config.unknown_keys() {
            warn!(%key, path = %path.display(), "ignoring unknown config key");
        }
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Keys of the loaded file that no setting consumed, as dotted paths.
    pub fn unknown_keys(&self) -> Vec<String> {
        let sections: [(&str, &Extra); 11] = [
            ("", &self.extra),
            ("network.", &self.network.extra),
            ("connMgr.", &self.conn_mgr.extra),
            ("acl.", &self.acl.extra),
            ("relayV2.", &self.relay_v2.extra),
            ("relayV2.resources.", &self.relay_v2.resources.extra),
            ("relayV2.resources.limit.", &self.relay_v2.resources.limit.extra),
            ("resources.", &self.resources.extra),
            ("routing.", &self.routing.extra),
            ("security.", &self.security.extra),
            ("daemon.", &self.daemon.extra),
        ];
        sections
            .into_iter()
            .flat_map(|(prefix, extra)| extra.keys().map(move |key| format!("{prefix}{key}")))
            .collect()
    }
}

/// Key material handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    /// What to do when the network secret cannot be loaded.
    pub on_secret_error: SecretFailurePolicy,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

/// Process-level endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Prometheus exporter port, `-1` disables it.
    #[serde(alias = "PromPort")]
    pub prom_port: i32,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            prom_port: DEFAULT_PROM_PORT,
            extra: Extra::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use relayd_relay_acl::Verdict;
    use tempfile::Builder;

    use super::*;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_path_is_default() {
        let config = RelayConfig::load("").unwrap();
        assert!(config.relay_v2.enabled);
        assert_eq!(config.daemon.prom_port, DEFAULT_PROM_PORT);
        assert_eq!(config.security.on_secret_error, SecretFailurePolicy::Fatal);
        assert!(config.network.announce_addrs.is_empty());
    }

    #[test]
    fn json_with_unknown_fields() {
        let file = write_config(
            ".json",
            r#"{
                "network": { "announceAddrs": ["/ip4/45.76.10.7/tcp/4001"] },
                "connMgr": { "low": 10, "high": 20, "grace": "1s" },
                "relayV2": {
                    "enabled": false,
                    "resources": { "limit": { "duration": "30s" }, "maxReservationsPerIP": 2 }
                },
                "daemon": { "promPort": -1, "pprofPort": 6060 },
                "somethingElse": true
            }"#,
        );
        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.unknown_keys(), ["somethingElse", "daemon.pprofPort"]);

        assert_eq!(config.network.announce_addrs, vec!["/ip4/45.76.10.7/tcp/4001"]);
        assert!(config.network.address_policy().unwrap().is_static());
        let connmgr = config.conn_mgr.to_conn_manager_config().unwrap();
        assert_eq!((connmgr.low, connmgr.high), (10, 20));
        assert_eq!(connmgr.grace, std::time::Duration::from_secs(1));

        let relay = config.relay_v2.to_relay_service();
        assert!(!relay.enabled);
        assert_eq!(relay.resources.limit_duration, std::time::Duration::from_secs(30));
        assert_eq!(relay.resources.max_reservations_per_ip, 2);
        assert_eq!(relay.resources.max_reservations, 128);
        assert_eq!(config.daemon.prom_port, -1);
    }

    #[test]
    fn toml_by_extension() {
        let file = write_config(
            ".toml",
            r#"
            [acl]
            allowSubnets = ["10.0.0.0/8"]
            default = "allow"
            audit = true

            [security]
            onSecretError = "public"
            "#,
        );
        let config = RelayConfig::load(file.path()).unwrap();
        let acl = config.acl.to_acl_config().unwrap();
        assert_eq!(acl.allow_subnets.len(), 1);
        assert_eq!(acl.default_verdict(), Verdict::Allow);
        assert!(acl.audit);
        assert_eq!(config.security.on_secret_error, SecretFailurePolicy::Public);
    }

    #[test]
    fn original_daemon_config_is_understood() {
        let peer = libp2p::identity::Keypair::generate_ed25519()
            .public()
            .to_peer_id();
        let file = write_config(
            ".json",
            &format!(
                r#"{{
                    "Network": {{
                        "ListenAddrs": ["/ip4/0.0.0.0/tcp/4002"],
                        "AnnounceAddrs": ["/ip4/45.76.10.7/tcp/4002"]
                    }},
                    "ConnMgr": {{
                        "ConnMgrLo": 64,
                        "ConnMgrHi": 128,
                        "ConnMgrGrace": 60000000000
                    }},
                    "RelayV2": {{
                        "Enabled": true,
                        "Resources": {{
                            "Limit": {{ "Duration": 120000000000, "Data": 131072 }},
                            "ReservationTTL": 3600000000000,
                            "MaxReservations": 256,
                            "MaxCircuits": 8,
                            "BufferSize": 4096,
                            "MaxReservationsPerPeer": 2,
                            "MaxReservationsPerIP": 4,
                            "MaxReservationsPerASN": 32
                        }}
                    }},
                    "ACL": {{
                        "AllowPeers": ["{peer}"],
                        "AllowSubnets": ["10.0.0.0/8"]
                    }},
                    "Daemon": {{ "PprofPort": -1 }}
                }}"#
            ),
        );
        let config = RelayConfig::load(file.path()).unwrap();

        assert_eq!(config.network.listen_addrs, ["/ip4/0.0.0.0/tcp/4002"]);
        assert!(config.network.address_policy().unwrap().is_static());

        let connmgr = config.conn_mgr.to_conn_manager_config().unwrap();
        assert_eq!((connmgr.low, connmgr.high), (64, 128));
        assert_eq!(connmgr.grace, std::time::Duration::from_secs(60));

        let acl = config.acl.to_acl_config().unwrap();
        assert!(acl.allow_peers.contains(&peer));
        assert_eq!(acl.allow_subnets.len(), 1);
        assert_eq!(acl.default_verdict(), Verdict::Deny);

        let relay = config.relay_v2.to_relay_service();
        assert_eq!(relay.resources.limit_duration, std::time::Duration::from_secs(120));
        assert_eq!(relay.resources.reservation_ttl, std::time::Duration::from_secs(3600));
        assert_eq!(relay.resources.max_reservations, 256);
        assert_eq!(relay.resources.max_circuits, 8);
        assert_eq!(relay.resources.buffer_size, 4096);
        assert_eq!(relay.resources.max_reservations_per_peer, 2);
        assert_eq!(relay.resources.max_reservations_per_ip, 4);

        // Settings this daemon does not implement are reported, not applied
        assert_eq!(
            config.unknown_keys(),
            ["relayV2.resources.MaxReservationsPerASN", "daemon.PprofPort"]
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config(".json", "{ not json");
        assert_matches!(RelayConfig::load(file.path()), Err(ConfigError::Json { .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert_matches!(
            RelayConfig::load("/nonexistent/relayd.json"),
            Err(ConfigError::Read { .. })
        );
    }
}
