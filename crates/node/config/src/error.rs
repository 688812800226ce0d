use std::{io, path::PathBuf};

use relayd_net_connmgr::ConnManagerError;

/// Configuration errors. All of them abort startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON config {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid TOML config {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid peer id {value:?} in {field}: {source}")]
    PeerId {
        field: &'static str,
        value: String,
        #[source]
        source: libp2p::identity::ParseError,
    },

    #[error("invalid subnet {value:?} in acl.allowSubnets: {source}")]
    Subnet {
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("invalid multiaddr {value:?} in {field}: {source}")]
    Multiaddr {
        field: &'static str,
        value: String,
        #[source]
        source: libp2p::multiaddr::Error,
    },

    #[error("invalid connMgr section: {0}")]
    ConnManager(#[from] ConnManagerError),
}
