//! Protocol-agnostic local network utilities for libp2p.
//!
//! - [`scope`] - IP address classification (loopback, private, link-local, public)
//! - [`announce`] - Which listen addresses are disclosed to peers

pub mod announce;
pub mod scope;

pub use announce::{AddressChange, AddressPolicy, AnnouncedAddrs};
pub use scope::{AddressScope, classify_multiaddr, extract_ip, is_public_multiaddr};
