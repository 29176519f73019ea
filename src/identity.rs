use std::fs;
use std::io::{self, Write};
use std::path::Path;

use libp2p::identity;

/// Load the node's long-term signing keypair from `path`, generating and
/// persisting a fresh one on first boot.
///
/// This never fails: a write failure leaves the node with an in-memory-only
/// identity for this run, and an unreadable or unparsable key file falls back
/// to a brand-new identity. Both cases are surfaced as warnings because the
/// node's federation identity changes across restarts when they happen.
pub fn load_or_create(path: &Path) -> identity::Keypair {
    match fs::read(path) {
        Ok(mut bytes) => match identity::ed25519::Keypair::try_from_bytes(&mut bytes) {
            Ok(keypair) => {
                log::info!("Loaded identity key from {}", path.display());
                identity::Keypair::from(keypair)
            }
            Err(err) => {
                log::warn!(
                    "identity churn: key file {} is unparsable ({err}); \
                     generating a fresh identity for this run",
                    path.display()
                );
                identity::Keypair::from(identity::ed25519::Keypair::generate())
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let keypair = identity::ed25519::Keypair::generate();
            match write_key(path, &keypair) {
                Ok(()) => log::info!("Generated identity key and saved to {}", path.display()),
                Err(err) => log::warn!(
                    "Couldn't write private key to {}: {err}; \
                     continuing with an in-memory identity",
                    path.display()
                ),
            }
            identity::Keypair::from(keypair)
        }
        Err(err) => {
            log::warn!(
                "identity churn: key file {} is unreadable ({err}); \
                 generating a fresh identity for this run",
                path.display()
            );
            identity::Keypair::from(identity::ed25519::Keypair::generate())
        }
    }
}

/// Raw 64-byte ed25519 keypair, owner-readable only.
fn write_key(path: &Path, keypair: &identity::ed25519::Keypair) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(&keypair.to_bytes())
}
