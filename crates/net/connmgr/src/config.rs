//! Watermark policy.

use std::time::Duration;

/// Default low watermark.
pub const DEFAULT_LOW_WATER: usize = 512;
/// Default high watermark.
pub const DEFAULT_HIGH_WATER: usize = 768;
/// Default grace period for new connections.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(120);
/// Default interval between background trim passes.
pub const DEFAULT_TRIM_INTERVAL: Duration = Duration::from_secs(10);

/// Connection manager errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnManagerError {
    /// The low watermark is above the high watermark.
    #[error("low watermark {low} exceeds high watermark {high}")]
    InvalidWatermarks {
        /// Configured low watermark.
        low: usize,
        /// Configured high watermark.
        high: usize,
    },
    /// A high watermark of zero would prune every connection.
    #[error("high watermark must be greater than zero")]
    ZeroHighWater,
}

/// Watermark policy: `(low, high, grace)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnManagerConfig {
    /// Target connection count after a pruning pass.
    pub low: usize,
    /// Connection count that triggers pruning.
    pub high: usize,
    /// Age before a connection may be pruned.
    pub grace: Duration,
    /// Interval between background trim passes.
    pub trim_interval: Duration,
}

impl Default for ConnManagerConfig {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_WATER,
            high: DEFAULT_HIGH_WATER,
            grace: DEFAULT_GRACE_PERIOD,
            trim_interval: DEFAULT_TRIM_INTERVAL,
        }
    }
}

impl ConnManagerConfig {
    /// Create a policy with the default trim interval.
    pub fn new(low: usize, high: usize, grace: Duration) -> Self {
        Self {
            low,
            high,
            grace,
            ..Default::default()
        }
    }

    /// Check `0 < high` and `low <= high`.
    pub fn validate(&self) -> Result<(), ConnManagerError> {
        if self.high == 0 {
            return Err(ConnManagerError::ZeroHighWater);
        }
        if self.low > self.high {
            return Err(ConnManagerError::InvalidWatermarks {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(ConnManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_watermarks() {
        let config = ConnManagerConfig::new(30, 20, Duration::from_secs(1));
        assert_matches!(
            config.validate(),
            Err(ConnManagerError::InvalidWatermarks { low: 30, high: 20 })
        );
    }

    #[test]
    fn rejects_zero_high() {
        let config = ConnManagerConfig::new(0, 0, Duration::ZERO);
        assert_matches!(config.validate(), Err(ConnManagerError::ZeroHighWater));
    }

    #[test]
    fn equal_watermarks_allowed() {
        assert!(
            ConnManagerConfig::new(10, 10, Duration::ZERO)
                .validate()
                .is_ok()
        );
    }
}
