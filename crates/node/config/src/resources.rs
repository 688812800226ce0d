use relayd_net_rcmgr::{PartialLimits, ResourceManagerConfig};
use serde::{Deserialize, Serialize};

use crate::Extra;

/// Resource manager budgets and per-scope overrides.
///
/// Everything left unset is auto-scaled from the host's memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceLimitsConfig {
    /// Memory budget in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_descriptors: Option<u64>,
    pub system: LimitOverrides,
    pub transient: LimitOverrides,
    pub peer: LimitOverrides,
    pub protocol: LimitOverrides,
    pub conn: LimitOverrides,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

/// Ceilings for one scope.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitOverrides {
    pub memory: Option<u64>,
    pub fds: Option<u64>,
    pub conns_inbound: Option<u64>,
    pub conns_outbound: Option<u64>,
    pub conns: Option<u64>,
    pub streams_inbound: Option<u64>,
    pub streams_outbound: Option<u64>,
    pub streams: Option<u64>,
}

impl From<LimitOverrides> for PartialLimits {
    fn from(o: LimitOverrides) -> Self {
        Self {
            memory: o.memory,
            fds: o.fds,
            conns_inbound: o.conns_inbound,
            conns_outbound: o.conns_outbound,
            conns: o.conns,
            streams_inbound: o.streams_inbound,
            streams_outbound: o.streams_outbound,
            streams: o.streams,
        }
    }
}

impl ResourceLimitsConfig {
    pub fn to_resource_manager_config(&self) -> ResourceManagerConfig {
        ResourceManagerConfig {
            max_memory: self.max_memory,
            max_file_descriptors: self.max_file_descriptors,
            scaling: Default::default(),
            system: self.system.into(),
            transient: self.transient.into(),
            peer: self.peer.into(),
            protocol: self.protocol.into(),
            conn: self.conn.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_scaled_values() {
        let config: ResourceLimitsConfig = serde_json::from_str(
            r#"{ "maxFileDescriptors": 1024, "system": { "connsInbound": 3 } }"#,
        )
        .unwrap();
        let limits = config
            .to_resource_manager_config()
            .resolve_with_total_memory(0);
        assert_eq!(limits.system.conns_inbound, 3);
        assert_eq!(limits.system.fds, 1024);
    }
}
