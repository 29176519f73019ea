use libp2p::PeerId;

use super::types::DirectoryUpdate;

/// Events emitted by the overlay node task.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A directory change received from another peer.
    ReplicatedUpdate(DirectoryUpdate),
    /// A peer was observed on the local network segment.
    PeerDiscovered(PeerId),
    /// A previously discovered peer stopped advertising.
    PeerExpired(PeerId),
}
