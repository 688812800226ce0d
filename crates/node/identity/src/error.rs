use std::{io, path::PathBuf};

/// Errors loading key material.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed identity key in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: libp2p::identity::DecodingError,
    },

    #[error("failed to encode identity key: {0}")]
    Encode(#[source] libp2p::identity::DecodingError),

    #[error("malformed network secret in {}: {source}", path.display())]
    Secret {
        path: PathBuf,
        #[source]
        source: libp2p::pnet::KeyParseError,
    },
}
