//! The relay host.
//!
//! Construction is two-phase. [`RelayHost::build`] creates the swarm with
//! every behaviour in place (the relay behaviour switched off). The caller
//! then triggers [`RelayHost::start_routing`], builds the ACL against the
//! live connection view and calls [`RelayHost::enable_relay`]. Finally
//! [`RelayHost::run`] drives the swarm until shutdown and stops each
//! component in reverse order.

mod behaviour;
mod config;
mod host;
mod security;
mod transport;

pub use behaviour::{RelayNodeBehaviour, RelayNodeEvent};
pub use config::{DEFAULT_IDLE_TIMEOUT, HostConfig};
pub use host::RelayHost;
pub use transport::build_transport;

/// Agent string sent in identify.
pub const AGENT_VERSION: &str = "relayd/1.0";

/// Identify protocol version.
pub const PROTOCOL_VERSION: &str = "/relayd/1.0.0";
