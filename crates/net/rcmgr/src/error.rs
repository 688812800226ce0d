use crate::{limits::Resource, scope::ScopeKind};

/// Resource reservation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// Reserving would exceed a scope's ceiling.
    #[error("{scope} scope limit exceeded for {resource}")]
    LimitExceeded {
        /// Scope that refused the reservation.
        scope: ScopeKind,
        /// Resource at its ceiling.
        resource: Resource,
    },
    /// The manager has been shut down.
    #[error("resource manager closed")]
    Closed,
}
