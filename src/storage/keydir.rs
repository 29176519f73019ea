use std::path::Path;

use libp2p::{PeerId, identity};
use rusqlite::{OptionalExtension, Result as SqlResult, params};

use super::database::Database;

/// Directory of peers' published signing keys (the serverkey database).
///
/// Discovery records a peer here the moment it is observed; the key itself
/// usually arrives later through the identify exchange. A peer whose row has
/// no key yet is unauthenticated until rediscovered or identified.
pub struct KeyDirectory {
    db: Database,
}

impl KeyDirectory {
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let keydir = Self {
            db: Database::open(path)?,
        };
        keydir.init_schema()?;
        Ok(keydir)
    }

    #[cfg(test)]
    pub fn in_memory() -> SqlResult<Self> {
        let keydir = Self {
            db: Database::in_memory()?,
        };
        keydir.init_schema()?;
        Ok(keydir)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS server_keys (
                peer_id TEXT PRIMARY KEY,
                public_key BLOB,
                first_seen INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                updated_at INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    /// One resolution attempt for a discovered peer: record it and report
    /// whether a published key is already on file.
    pub fn resolve(&self, peer: &PeerId) -> SqlResult<bool> {
        let conn = self.db.lock();
        let peer = peer.to_string();
        conn.execute(
            "INSERT OR IGNORE INTO server_keys (peer_id) VALUES (?1)",
            params![peer],
        )?;
        conn.query_row(
            "SELECT public_key IS NOT NULL FROM server_keys WHERE peer_id = ?1",
            params![peer],
            |row| row.get(0),
        )
    }

    /// Persist a key published by a peer (protobuf-encoded).
    pub fn store_key(&self, peer: &PeerId, key: &identity::PublicKey) -> SqlResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO server_keys (peer_id, public_key, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(peer_id) DO UPDATE SET
                 public_key = excluded.public_key,
                 updated_at = excluded.updated_at",
            params![peer.to_string(), key.encode_protobuf()],
        )?;
        Ok(())
    }

    /// The key published by `peer`, if any has been resolved.
    pub fn lookup(&self, peer: &PeerId) -> SqlResult<Option<identity::PublicKey>> {
        let conn = self.db.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT public_key FROM server_keys
                 WHERE peer_id = ?1 AND public_key IS NOT NULL",
                params![peer.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(blob.and_then(|bytes| match identity::PublicKey::try_decode_protobuf(&bytes) {
            Ok(key) => Some(key),
            Err(err) => {
                log::warn!("Stored key for {peer} does not decode: {err}");
                None
            }
        }))
    }

    pub fn known_peers(&self) -> SqlResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM server_keys", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_and_key() -> (PeerId, identity::PublicKey) {
        let keypair = identity::Keypair::generate_ed25519();
        (PeerId::from(keypair.public()), keypair.public())
    }

    #[test]
    fn resolve_records_peer_without_key() {
        let keydir = KeyDirectory::in_memory().unwrap();
        let (peer, _) = peer_and_key();

        assert!(!keydir.resolve(&peer).unwrap());
        assert_eq!(keydir.known_peers().unwrap(), 1);
        assert!(keydir.lookup(&peer).unwrap().is_none());
    }

    #[test]
    fn stored_key_resolves_and_survives_rediscovery() {
        let keydir = KeyDirectory::in_memory().unwrap();
        let (peer, key) = peer_and_key();

        keydir.store_key(&peer, &key).unwrap();
        assert!(keydir.resolve(&peer).unwrap());
        assert_eq!(keydir.lookup(&peer).unwrap().unwrap(), key);
        assert_eq!(keydir.known_peers().unwrap(), 1);
    }
}
