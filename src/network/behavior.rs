use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, IdentTopic};
use libp2p::kad::{self, store::MemoryStore};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{PeerId, StreamProtocol, identify, identity, mdns, request_response};

use crate::common::types::{WireRequest, WireResponse};

/// Protocol tag for federation requests carried over overlay streams.
pub const FEDERATION_PROTOCOL: &str = "/matrix/federation/1";

/// Gossip topic carrying public-room directory updates.
pub const DIRECTORY_TOPIC: &str = "dendrite-p2p/public-rooms";

/// How often mDNS re-advertises this node on the local segment.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(NetworkBehaviour)]
pub struct NodeBehavior {
    pub gossipsub: gossipsub::Behaviour,
    pub kad: kad::Behaviour<MemoryStore>,
    pub mdns: mdns::tokio::Behaviour,
    pub identify: identify::Behaviour,
    pub federation: request_response::json::Behaviour<WireRequest, WireResponse>,
}

pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
) -> Result<(NodeBehavior, IdentTopic), crate::common::BoxError> {
    let message_id_fn = |message: &gossipsub::Message| {
        let mut hasher = DefaultHasher::new();
        message.data.hash(&mut hasher);
        gossipsub::MessageId::from(hasher.finish().to_string())
    };

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(10))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(message_id_fn)
        .build()?;

    let mut gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(local_key.clone()),
        gossipsub_config,
    )?;

    let topic = gossipsub::IdentTopic::new(DIRECTORY_TOPIC);
    gossipsub.subscribe(&topic)?;

    let store = MemoryStore::new(local_peer_id);
    let mut kad = kad::Behaviour::new(local_peer_id, store);
    kad.set_mode(Some(kad::Mode::Server));

    let mdns_config = mdns::Config {
        query_interval: DISCOVERY_INTERVAL,
        ..Default::default()
    };
    let mdns_behaviour = mdns::tokio::Behaviour::new(mdns_config, local_peer_id)?;

    let identify_config = identify::Config::new(
        format!("dendrite-p2p/{}", env!("CARGO_PKG_VERSION")),
        local_key.public(),
    );
    let identify = identify::Behaviour::new(identify_config);

    let federation = request_response::json::Behaviour::new(
        [(
            StreamProtocol::new(FEDERATION_PROTOCOL),
            request_response::ProtocolSupport::Full,
        )],
        request_response::Config::default(),
    );

    Ok((
        NodeBehavior {
            gossipsub,
            kad,
            mdns: mdns_behaviour,
            identify,
            federation,
        },
        topic,
    ))
}
