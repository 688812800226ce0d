//! Resource manager.
//!
//! Hard, synchronous ceilings on memory, file descriptors, connections and
//! streams, enforced over a tree of scopes:
//!
//! ```text
//!                    system
//!                 /    |    \
//!        transient   peer*   protocol*
//!              |       |
//!          connection  connection
//! ```
//!
//! A reservation is charged to every scope on its chain and fails without
//! blocking if any of them would exceed its ceiling. Reservations are RAII
//! guards; dropping one releases its usage everywhere it was charged.
//!
//! # What is charged
//!
//! [`ResourceBehaviour`] charges every connection, inbound or outbound,
//! before it is established. Streams are charged only where the daemon
//! itself accepts them: relay hop streams, through
//! [`ResourceManager::reserve_stream`] in the relay service. Kademlia,
//! identify and ping streams are opened inside their own connection
//! handlers, which expose no admission hook, so they count against the
//! connection that carries them but never against a stream scope.

mod behaviour;
mod error;
mod limits;
mod manager;
mod metrics;
mod scope;

pub use behaviour::ResourceBehaviour;
pub use error::ResourceError;
pub use limits::{
    DEFAULT_FD_BUDGET, Limits, PartialLimits, ResolvedLimits, Resource, ResourceManagerConfig,
    ScalingLimits, ScopeLimits,
};
pub use manager::{ConnectionScope, ResourceManager, ScopeReservation};
pub use scope::{ScopeKind, Usage};
