use std::{fs, path::Path, str::FromStr};

use libp2p::pnet::{Fingerprint, PreSharedKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::IdentityError;

/// A private network pre-shared key and its fingerprint.
#[derive(Clone, Copy)]
pub struct NetworkSecret {
    pub key: PreSharedKey,
    pub fingerprint: Fingerprint,
}

// `Fingerprint` has no `Debug` impl; format it via `Display`.
impl std::fmt::Debug for NetworkSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSecret")
            .field("key", &self.key)
            .field("fingerprint", &format_args!("{}", self.fingerprint))
            .finish()
    }
}

impl NetworkSecret {
    pub fn new(key: PreSharedKey) -> Self {
        Self {
            fingerprint: key.fingerprint(),
            key,
        }
    }
}

/// What to do when the network secret file cannot be loaded.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SecretFailurePolicy {
    /// Abort startup.
    #[default]
    Fatal,
    /// Warn and join the public network.
    Public,
}

impl SecretFailurePolicy {
    /// Apply the policy to the result of [`load_network_secret`].
    pub fn apply(
        self,
        loaded: Result<Option<NetworkSecret>, IdentityError>,
    ) -> Result<Option<NetworkSecret>, IdentityError> {
        match (self, loaded) {
            (Self::Public, Err(error)) => {
                warn!(%error, "network secret unusable, continuing on the public network");
                Ok(None)
            }
            (_, loaded) => loaded,
        }
    }
}

/// Load a swarm key from `path`. No path means the public network.
pub fn load_network_secret(path: Option<&Path>) -> Result<Option<NetworkSecret>, IdentityError> {
    let Some(path) = path else {
        return Ok(None);
    };

    let text = fs::read_to_string(path).map_err(|source| IdentityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let key = PreSharedKey::from_str(&text).map_err(|source| IdentityError::Secret {
        path: path.to_path_buf(),
        source,
    })?;

    let secret = NetworkSecret::new(key);
    info!(fingerprint = %secret.fingerprint, "private network enabled");
    Ok(Some(secret))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::NamedTempFile;

    use super::*;

    fn swarm_key(bytes: [u8; 32]) -> String {
        format!("/key/swarm/psk/1.0.0/\n/base16/\n{}\n", hex::encode(bytes))
    }

    #[test]
    fn absent_path_is_public() {
        assert!(load_network_secret(None).unwrap().is_none());
    }

    #[test]
    fn loads_swarm_key() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), swarm_key([0x42; 32])).unwrap();

        let secret = load_network_secret(Some(file.path())).unwrap().unwrap();
        let expected = PreSharedKey::new([0x42; 32]);
        assert!(secret.fingerprint == expected.fingerprint());
        assert_eq!(secret.key, expected);
    }

    #[test]
    fn malformed_key_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "/key/swarm/psk/1.0.0/\n/base16/\nzz\n").unwrap();

        assert_matches!(
            load_network_secret(Some(file.path())),
            Err(IdentityError::Secret { .. })
        );
    }

    #[test]
    fn policy_decides_failure() {
        let missing = Path::new("/nonexistent/relayd/swarm.key");

        assert_matches!(
            SecretFailurePolicy::Fatal.apply(load_network_secret(Some(missing))),
            Err(IdentityError::Read { .. })
        );
        assert_matches!(
            SecretFailurePolicy::Public.apply(load_network_secret(Some(missing))),
            Ok(None)
        );
    }

    #[test]
    fn policy_parses_from_config() {
        assert_eq!(
            "public".parse::<SecretFailurePolicy>().unwrap(),
            SecretFailurePolicy::Public
        );
        assert_eq!(SecretFailurePolicy::default(), SecretFailurePolicy::Fatal);
    }
}
