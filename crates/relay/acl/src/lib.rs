//! Access control for relay requests.
//!
//! Every reservation and connect-through request is evaluated against
//! in-memory allow/deny lists and, optionally, the live connection table.
//! Evaluation never blocks and never fails: any peer not explicitly listed
//! resolves to the configured default verdict.

mod acl;
mod config;
mod view;

pub use acl::{Acl, RelayAction, Verdict};
pub use config::AclConfig;
pub use view::ConnectionView;
