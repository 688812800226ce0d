//! Node identity and private network secret.
//!
//! The identity file holds a protobuf-encoded libp2p private key. A missing
//! file is created with a fresh Ed25519 key; an existing file that cannot be
//! read or decoded is always an error, since a replaced key changes the
//! node's peer id.
//!
//! The optional network secret uses the swarm key v1 format and restricts
//! every transport connection to peers holding the same key.

mod error;
mod key;
mod secret;

pub use error::IdentityError;
pub use key::{IDENTITY_FILE_MODE, load_identity};
pub use secret::{NetworkSecret, SecretFailurePolicy, load_network_secret};
