//! Routing overlay bootstrap.
//!
//! The Kademlia behaviour is created as part of the swarm; bootstrapping is
//! triggered explicitly afterwards, once the swarm can dial. Progress is
//! published on a watch channel:
//!
//! ```text
//! Idle → Bootstrapping → Active
//!              ↓  ↑ retry
//!           Degraded
//! ```
//!
//! Any state may move to `Stopped`, which is final.

mod bootstrap;
mod config;

pub use bootstrap::{RoutingBootstrap, RoutingHandle, RoutingState};
pub use config::{DEFAULT_BOOTSTRAP_PEERS, KAD_PROTOCOL, RoutingConfig, RoutingError, build_kad};
