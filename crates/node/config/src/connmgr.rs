use std::time::Duration;

use relayd_net_connmgr::{
    ConnManagerConfig, DEFAULT_GRACE_PERIOD, DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER,
};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Extra};

/// Connection manager watermarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnMgrConfig {
    #[serde(alias = "ConnMgrLo")]
    pub low: usize,
    #[serde(alias = "ConnMgrHi")]
    pub high: usize,
    #[serde(alias = "ConnMgrGrace", with = "crate::serde_duration")]
    pub grace: Duration,
    /// Keys no field recognised.
    #[serde(flatten, skip_serializing)]
    pub(crate) extra: Extra,
}

impl Default for ConnMgrConfig {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_WATER,
            high: DEFAULT_HIGH_WATER,
            grace: DEFAULT_GRACE_PERIOD,
            extra: Extra::new(),
        }
    }
}

impl ConnMgrConfig {
    pub fn to_conn_manager_config(&self) -> Result<ConnManagerConfig, ConfigError> {
        let config = ConnManagerConfig::new(self.low, self.high, self.grace);
        config.validate()?;
        Ok(config)
    }
}
