use std::collections::HashSet;

use ipnet::IpNet;
use libp2p::PeerId;
use relayd_relay_acl::Verdict;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Extra};

/// Verdict for peers no ACL rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultVerdict {
    Allow,
    Deny,
}

impl From<DefaultVerdict> for Verdict {
    fn from(value: DefaultVerdict) -> Self {
        match value {
            DefaultVerdict::Allow => Self::Allow,
            DefaultVerdict::Deny => Self::Deny,
        }
    }
}

/// Relay access control lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AclConfig {
    #[serde(alias = "AllowPeers")]
    pub allow_peers: Vec<String>,
    #[serde(alias = "DenyPeers")]
    pub deny_peers: Vec<String>,
    /// CIDR blocks, e.g. `10.0.0.0/8`.
    #[serde(alias = "AllowSubnets")]
    pub allow_subnets: Vec<String>,
    /// Unset means deny when an allow list is configured, allow otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conns_per_peer: Option<usize>,
    /// Log every denial at info level.
    pub audit: bool,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl AclConfig {
    pub fn to_acl_config(&self) -> Result<relayd_relay_acl::AclConfig, ConfigError> {
        let allow_subnets = self
            .allow_subnets
            .iter()
            .map(|value| {
                value.parse::<IpNet>().map_err(|source| ConfigError::Subnet {
                    value: value.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(relayd_relay_acl::AclConfig {
            allow_peers: parse_peers("acl.allowPeers", &self.allow_peers)?,
            deny_peers: parse_peers("acl.denyPeers", &self.deny_peers)?,
            allow_subnets,
            default: self.default.map(Verdict::from),
            max_conns_per_peer: self.max_conns_per_peer,
            audit: self.audit,
        })
    }
}

fn parse_peers(field: &'static str, values: &[String]) -> Result<HashSet<PeerId>, ConfigError> {
    values
        .iter()
        .map(|value| {
            value.parse().map_err(|source| ConfigError::PeerId {
                field,
                value: value.clone(),
                source,
            })
        })
        .collect()
}
