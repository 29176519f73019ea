use libp2p::PeerId;
use libp2p::request_response::OutboundFailure;
use tokio::sync::oneshot;

use super::types::{DirectoryEntry, DirectoryUpdate, WireRequest, WireResponse};

/// Commands sent into the overlay node task.
pub enum OverlayCommand {
    /// Broadcast a directory change on the gossip topic.
    PublishDirectory(DirectoryUpdate),
    /// Store a directory entry in the DHT.
    PutDirectoryRecord(DirectoryEntry),
    /// Fetch a directory entry from the DHT.
    GetDirectoryRecord {
        room_id: String,
        reply: oneshot::Sender<Option<DirectoryEntry>>,
    },
    /// Send a federation request to a peer over the overlay.
    SendRequest {
        peer: PeerId,
        request: WireRequest,
        reply: oneshot::Sender<Result<WireResponse, OutboundFailure>>,
    },
}
