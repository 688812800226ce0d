//! Circuit relay service.
//!
//! Relay capability is opt-in. When enabled, every reservation and circuit
//! request passes an admission gate before the relay protocol accepts it:
//!
//! 1. the service must not be stopped,
//! 2. the ACL must allow the peer,
//! 3. reservations must fit the per-IP cap,
//! 4. the resource manager must grant a stream in the peer and hop scopes.
//!
//! A rejection only affects the offending request.

mod config;
mod error;
mod gate;
mod limiter;
mod service;

pub use config::RelayResources;
pub use error::RelayError;
pub use gate::{RelayGate, Rejection};
pub use service::{RelayHandle, RelayService};

/// Protection tag for peers holding a reservation.
pub const RESERVATION_TAG: &str = "relay-reservation";

/// Resource scope name for the relay hop protocol.
pub const HOP_PROTOCOL: &str = "/libp2p/circuit/relay/0.2.0/hop";
