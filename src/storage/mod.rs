pub mod database;
pub mod directory;
pub mod keydir;

pub use directory::RoomDirectory;
pub use keydir::KeyDirectory;

use rusqlite::Result as SqlResult;
use url::Url;

use crate::common::types::{DirectoryEntry, DirectoryUpdate, PublicRoomFilter};
use crate::common::BoxError;
use crate::network::OverlayHandle;

const SCHEME_POSTGRES: &str = "postgres";
const SCHEME_FILE: &str = "file";

/// Which replicated backend the overlay offers the directory.
pub enum OverlayContext {
    /// Broadcast updates on the gossip topic.
    Gossip(OverlayHandle),
    /// Store entries in the Kademlia DHT.
    Dht(OverlayHandle),
}

/// The public-room directory, one of three mutually exclusive backends
/// chosen once at startup. All variants expose the same read/write
/// interface; the consistency contract differs per variant.
pub enum DirectoryStore {
    /// Local single-node store. Linearizable, single-writer, invisible to
    /// other nodes.
    Embedded(RoomDirectory),
    /// Gossip-replicated store. Updates are broadcast to subscribed peers;
    /// convergence is eventual and unordered, last-applied-wins per reader.
    Gossip {
        replica: RoomDirectory,
        overlay: OverlayHandle,
    },
    /// DHT-replicated store. Entries live at hashed positions across peers;
    /// reads can be stale or missing while responsible peers are offline,
    /// and the write-acknowledgement threshold is the backend's own.
    Dht {
        replica: RoomDirectory,
        overlay: OverlayHandle,
    },
}

/// Open the directory store selected by the connection descriptor.
///
/// `file:` descriptors open the embedded local store; `postgres:` selects
/// the network-replicated variant matching the overlay context, as does any
/// descriptor that is unparsable or carries another scheme.
pub fn open_directory_store(conn: &str, context: OverlayContext) -> SqlResult<DirectoryStore> {
    match Url::parse(conn) {
        Ok(uri) if uri.scheme() == SCHEME_FILE => {
            let path = conn.strip_prefix("file:").unwrap_or(conn);
            Ok(DirectoryStore::Embedded(RoomDirectory::open(path)?))
        }
        Ok(uri) if uri.scheme() == SCHEME_POSTGRES => open_replicated(context),
        Ok(_) | Err(_) => open_replicated(context),
    }
}

fn open_replicated(context: OverlayContext) -> SqlResult<DirectoryStore> {
    // The replica holds network-owned, rediscoverable entries; it does not
    // need to outlive the process.
    let replica = RoomDirectory::in_memory()?;
    Ok(match context {
        OverlayContext::Gossip(overlay) => DirectoryStore::Gossip { replica, overlay },
        OverlayContext::Dht(overlay) => DirectoryStore::Dht { replica, overlay },
    })
}

impl DirectoryStore {
    fn local(&self) -> &RoomDirectory {
        match self {
            DirectoryStore::Embedded(local) => local,
            DirectoryStore::Gossip { replica, .. } | DirectoryStore::Dht { replica, .. } => replica,
        }
    }

    pub fn query(&self, filter: &PublicRoomFilter) -> SqlResult<Vec<DirectoryEntry>> {
        self.local().query(filter)
    }

    pub fn count(&self) -> SqlResult<usize> {
        self.local().count()
    }

    /// Publish or update an entry, propagating it per the variant's
    /// replication strategy.
    pub async fn upsert(&self, entry: DirectoryEntry) -> Result<(), BoxError> {
        self.local().upsert(&entry)?;
        match self {
            DirectoryStore::Embedded(_) => {}
            DirectoryStore::Gossip { overlay, .. } => {
                overlay
                    .publish_directory(DirectoryUpdate::Upsert(entry))
                    .await?;
            }
            DirectoryStore::Dht { overlay, .. } => {
                overlay.put_directory_record(entry).await?;
            }
        }
        Ok(())
    }

    /// Remove an entry. Gossip peers receive a tombstone; DHT copies are
    /// left to expire with their records.
    pub async fn delete(&self, room_id: &str) -> Result<(), BoxError> {
        self.local().delete(room_id)?;
        if let DirectoryStore::Gossip { overlay, .. } = self {
            overlay
                .publish_directory(DirectoryUpdate::Delete {
                    room_id: room_id.to_string(),
                })
                .await?;
        }
        Ok(())
    }

    /// Fetch a single entry. The DHT variant consults the network and folds
    /// whatever it finds into the local replica before answering.
    pub async fn lookup(&self, room_id: &str) -> Result<Option<DirectoryEntry>, BoxError> {
        if let DirectoryStore::Dht { replica, overlay } = self {
            if let Some(entry) = overlay.get_directory_record(room_id).await? {
                replica.upsert(&entry)?;
                return Ok(Some(entry));
            }
        }
        Ok(self.local().get(room_id)?)
    }

    /// True for the variants fed by the replication layer.
    pub fn is_replicated(&self) -> bool {
        !matches!(self, DirectoryStore::Embedded(_))
    }

    /// Apply a change delivered by the replication layer, without
    /// re-propagating it. The embedded store is local-only: nothing another
    /// node publishes belongs in it, so remote changes are discarded.
    pub fn apply_remote(&self, update: &DirectoryUpdate) -> SqlResult<()> {
        match self {
            DirectoryStore::Embedded(_) => Ok(()),
            DirectoryStore::Gossip { replica, .. } | DirectoryStore::Dht { replica, .. } => {
                replica.apply(update)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::common::OverlayCommand;

    fn overlay() -> (OverlayHandle, mpsc::Receiver<OverlayCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (OverlayHandle::new(tx), rx)
    }

    fn entry(room_id: &str) -> DirectoryEntry {
        DirectoryEntry {
            room_id: room_id.to_string(),
            name: Some("test room".to_string()),
            topic: None,
            joined_members: 1,
            world_readable: false,
        }
    }

    #[test]
    fn file_scheme_selects_embedded_store() {
        let dir = tempfile::tempdir().unwrap();
        let conn = format!("file:{}", dir.path().join("rooms.db").display());
        let (handle, _rx) = overlay();

        let store = open_directory_store(&conn, OverlayContext::Gossip(handle)).unwrap();
        assert!(matches!(store, DirectoryStore::Embedded(_)));
    }

    #[test]
    fn postgres_scheme_selects_variant_matching_context() {
        let (gossip, _grx) = overlay();
        let store = open_directory_store("postgres://host/db", OverlayContext::Gossip(gossip)).unwrap();
        assert!(matches!(store, DirectoryStore::Gossip { .. }));

        let (dht, _drx) = overlay();
        let store = open_directory_store("postgres://host/db", OverlayContext::Dht(dht)).unwrap();
        assert!(matches!(store, DirectoryStore::Dht { .. }));
    }

    #[test]
    fn garbage_descriptor_defaults_to_replicated_variant() {
        let (handle, _rx) = overlay();
        let store = open_directory_store("not a uri \u{0}", OverlayContext::Gossip(handle)).unwrap();
        assert!(matches!(store, DirectoryStore::Gossip { .. }));
    }

    #[test]
    fn unknown_scheme_defaults_to_replicated_variant() {
        let (handle, _rx) = overlay();
        let store = open_directory_store("mysql://host/db", OverlayContext::Dht(handle)).unwrap();
        assert!(matches!(store, DirectoryStore::Dht { .. }));
    }

    #[tokio::test]
    async fn gossip_upsert_broadcasts_and_stores_locally() {
        let (handle, mut rx) = overlay();
        let store = open_replicated(OverlayContext::Gossip(handle)).unwrap();

        store.upsert(entry("!a:p2p")).await.unwrap();

        assert_eq!(store.count().unwrap(), 1);
        match rx.recv().await {
            Some(OverlayCommand::PublishDirectory(DirectoryUpdate::Upsert(sent))) => {
                assert_eq!(sent.room_id, "!a:p2p");
            }
            other => panic!("expected a directory broadcast, got {:?}", other.is_some()),
        }
    }

    #[tokio::test]
    async fn dht_upsert_puts_record() {
        let (handle, mut rx) = overlay();
        let store = open_replicated(OverlayContext::Dht(handle)).unwrap();

        store.upsert(entry("!a:p2p")).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(OverlayCommand::PutDirectoryRecord(_))
        ));
    }

    #[tokio::test]
    async fn embedded_store_discards_replicated_updates() {
        let dir = tempfile::tempdir().unwrap();
        let conn = format!("file:{}", dir.path().join("rooms.db").display());
        let (handle, _rx) = overlay();
        let store = open_directory_store(&conn, OverlayContext::Gossip(handle)).unwrap();
        assert!(!store.is_replicated());

        store
            .apply_remote(&DirectoryUpdate::Upsert(entry("!remote:p2p")))
            .unwrap();

        // No cross-node visibility: only its own upserts land in it.
        assert_eq!(store.count().unwrap(), 0);
        store.upsert(entry("!local:p2p")).await.unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn dht_lookup_fetches_and_merges_into_replica() {
        let (handle, mut rx) = overlay();
        let store = open_replicated(OverlayContext::Dht(handle)).unwrap();
        let served = entry("!dht:p2p");
        let expected = served.clone();

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(OverlayCommand::GetDirectoryRecord { room_id, reply }) => {
                    assert_eq!(room_id, "!dht:p2p");
                    let _ = reply.send(Some(served));
                }
                _ => panic!("expected a directory record fetch"),
            }
        });

        let found = store.lookup("!dht:p2p").await.unwrap().unwrap();
        assert_eq!(found, expected);
        // The fetched entry is folded into the local replica.
        assert_eq!(store.count().unwrap(), 1);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn apply_remote_does_not_rebroadcast() {
        let (handle, mut rx) = overlay();
        let store = open_replicated(OverlayContext::Gossip(handle)).unwrap();

        store
            .apply_remote(&DirectoryUpdate::Upsert(entry("!a:p2p")))
            .unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert!(rx.try_recv().is_err());
    }
}
