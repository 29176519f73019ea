pub mod commands;
pub mod events;
pub mod types;

pub use commands::OverlayCommand;
pub use events::NetworkEvent;
pub use types::{DirectoryEntry, DirectoryUpdate, PublicRoomFilter, WireRequest, WireResponse};

/// Error type for async run paths.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
