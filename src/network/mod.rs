pub mod behavior;
pub mod federation;
pub mod node;
pub mod transport;

pub use federation::FederationClient;
pub use node::{OverlayHandle, OverlayNode};
