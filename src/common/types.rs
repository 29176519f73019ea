use serde::{Deserialize, Serialize};

/// A public room as advertised in the shared directory.
///
/// Entries are collectively owned by the network: any peer may publish or
/// update one, and no peer enforces mutual exclusion over a room id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub joined_members: i64,
    #[serde(default)]
    pub world_readable: bool,
}

/// Filter for directory queries.
#[derive(Debug, Clone, Default)]
pub struct PublicRoomFilter {
    pub search_term: Option<String>,
    pub limit: Option<u32>,
}

/// A replicated change to the directory, as carried over the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DirectoryUpdate {
    Upsert(DirectoryEntry),
    Delete { room_id: String },
}

/// A federation request carried over an overlay stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Vec<u8>,
    /// Server name of the sending node, stamped on outbound requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Key id the sender would sign with, e.g. `ed25519:<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_key_id: Option<String>,
}

/// The response to a [`WireRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Vec<u8>,
}

/// Payload of the public-rooms listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicRoomsChunk {
    pub chunk: Vec<DirectoryEntry>,
    pub total_room_count_estimate: usize,
}
