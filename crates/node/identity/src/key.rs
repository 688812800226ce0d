use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use libp2p::identity::Keypair;
use tracing::{debug, info};

use crate::IdentityError;

/// File mode for a newly written identity key (owner read-only).
pub const IDENTITY_FILE_MODE: u32 = 0o400;

/// Load the node identity from `path`, generating one if the file is absent.
///
/// An existing file that cannot be read or decoded is an error; it is never
/// replaced.
pub fn load_identity(path: impl AsRef<Path>) -> Result<Keypair, IdentityError> {
    let path = path.as_ref();

    match fs::read(path) {
        Ok(bytes) => {
            let keypair = Keypair::from_protobuf_encoding(&bytes).map_err(|source| {
                IdentityError::Decode {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            debug!(path = %path.display(), peer_id = %keypair.public().to_peer_id(), "loaded identity");
            Ok(keypair)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let keypair = Keypair::generate_ed25519();
            let encoded = keypair.to_protobuf_encoding().map_err(IdentityError::Encode)?;
            write_new(path, &encoded).map_err(|source| IdentityError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            info!(path = %path.display(), peer_id = %keypair.public().to_peer_id(), "generated new identity");
            Ok(keypair)
        }
        Err(source) => Err(IdentityError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Create `path` exclusively and write `contents`, read-only for the owner.
fn write_new(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(IDENTITY_FILE_MODE);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn generates_when_missing_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity");

        let first = load_identity(&path).unwrap();
        assert!(path.exists());
        let second = load_identity(&path).unwrap();
        assert_eq!(first.public().to_peer_id(), second.public().to_peer_id());
    }

    #[cfg(unix)]
    #[test]
    fn new_identity_is_owner_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity");
        load_identity(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, IDENTITY_FILE_MODE);
    }

    #[test]
    fn malformed_file_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity");
        fs::write(&path, b"not a key").unwrap();

        assert_matches!(load_identity(&path), Err(IdentityError::Decode { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"not a key");
    }

    #[test]
    fn directory_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        assert_matches!(load_identity(dir.path()), Err(IdentityError::Read { .. }));
    }
}
