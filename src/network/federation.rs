use libp2p::PeerId;
use url::Url;

use crate::common::BoxError;
use crate::common::types::{PublicRoomsChunk, WireRequest, WireResponse};
use crate::router::PUBLIC_ROOMS_PATH;

use super::node::OverlayHandle;

/// Scheme for federation destinations addressed by overlay peer id.
const MATRIX_SCHEME: &str = "matrix";

/// Client for inter-node federation requests. All traffic is routed over
/// the overlay; there is no plain-TCP federation path in this mode.
#[derive(Clone)]
pub struct FederationClient {
    overlay: OverlayHandle,
    server_name: String,
    key_id: String,
}

impl FederationClient {
    pub fn new(overlay: OverlayHandle, server_name: String, key_id: String) -> Self {
        Self {
            overlay,
            server_name,
            key_id,
        }
    }

    /// Identify this node on an outbound request so the receiving side
    /// knows who is asking and which key would vouch for it.
    fn stamp(&self, mut request: WireRequest) -> WireRequest {
        request.origin = Some(self.server_name.clone());
        request.origin_key_id = Some(self.key_id.clone());
        request
    }

    /// Send a request to a `matrix://<peer-id>` destination.
    pub async fn request(
        &self,
        destination: &str,
        request: WireRequest,
    ) -> Result<WireResponse, BoxError> {
        let peer = parse_destination(destination)?;
        self.overlay.send_request(peer, self.stamp(request)).await
    }

    /// Pull a peer's public-room listing for merge into the local replica.
    pub async fn fetch_public_rooms(&self, peer: &PeerId) -> Result<Vec<crate::common::DirectoryEntry>, BoxError> {
        let request = self.stamp(WireRequest {
            method: "GET".to_string(),
            path: PUBLIC_ROOMS_PATH.to_string(),
            body: Vec::new(),
            origin: None,
            origin_key_id: None,
        });
        let response = self.overlay.send_request(*peer, request).await?;
        if response.status != 200 {
            return Err(format!(
                "peer {peer} answered the public rooms fetch with status {}",
                response.status
            )
            .into());
        }
        let chunk: PublicRoomsChunk = serde_json::from_slice(&response.body)?;
        Ok(chunk.chunk)
    }
}

/// Resolve a federation destination to an overlay peer.
pub fn parse_destination(destination: &str) -> Result<PeerId, BoxError> {
    let url = Url::parse(destination)?;
    if url.scheme() != MATRIX_SCHEME {
        return Err(format!(
            "unsupported destination scheme `{}` (expected `{MATRIX_SCHEME}`)",
            url.scheme()
        )
        .into());
    }
    let host = url
        .host_str()
        .ok_or("destination is missing a peer id host")?;
    Ok(host.parse::<PeerId>()?)
}
