/// Relay service errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A resource setting is zero.
    #[error("invalid relay resource setting {field}: must be greater than zero")]
    InvalidResource {
        /// Offending setting.
        field: &'static str,
    },
    /// Enabling was requested while the service is switched off.
    #[error("relay service is disabled in configuration")]
    Disabled,
    /// The relay was already enabled on this host.
    #[error("relay service already enabled")]
    AlreadyEnabled,
}
