use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, OutboundFailure, OutboundRequestId};
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{PeerId, Swarm, gossipsub, identify, identity, kad, mdns};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::common::types::{DirectoryEntry, DirectoryUpdate, WireRequest, WireResponse};
use crate::common::{BoxError, NetworkEvent, OverlayCommand};
use crate::router;
use crate::storage::KeyDirectory;

use super::behavior::{NodeBehavior, NodeBehaviorEvent, build_behavior};
use super::transport::build_transport;

/// Cloneable handle for talking to the overlay node task.
#[derive(Clone)]
pub struct OverlayHandle {
    commands: mpsc::Sender<OverlayCommand>,
}

impl OverlayHandle {
    pub fn new(commands: mpsc::Sender<OverlayCommand>) -> Self {
        Self { commands }
    }

    pub async fn publish_directory(&self, update: DirectoryUpdate) -> Result<(), BoxError> {
        self.commands
            .send(OverlayCommand::PublishDirectory(update))
            .await
            .map_err(|_| "overlay node task is gone".into())
    }

    pub async fn put_directory_record(&self, entry: DirectoryEntry) -> Result<(), BoxError> {
        self.commands
            .send(OverlayCommand::PutDirectoryRecord(entry))
            .await
            .map_err(|_| "overlay node task is gone".into())
    }

    pub async fn get_directory_record(
        &self,
        room_id: &str,
    ) -> Result<Option<DirectoryEntry>, BoxError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(OverlayCommand::GetDirectoryRecord {
                room_id: room_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| -> BoxError { "overlay node task is gone".into() })?;
        Ok(response.await?)
    }

    pub async fn send_request(
        &self,
        peer: PeerId,
        request: WireRequest,
    ) -> Result<WireResponse, BoxError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(OverlayCommand::SendRequest {
                peer,
                request,
                reply,
            })
            .await
            .map_err(|_| -> BoxError { "overlay node task is gone".into() })?;
        Ok(response.await??)
    }
}

/// The overlay node: owns the swarm and serves as both the discovery
/// service and the overlay-side listener for federation requests.
pub struct OverlayNode {
    swarm: Swarm<NodeBehavior>,
    topic: gossipsub::IdentTopic,
    commands: mpsc::Receiver<OverlayCommand>,
    events: mpsc::Sender<NetworkEvent>,
    keydir: Arc<KeyDirectory>,
    router: Router,
    pending_requests: HashMap<OutboundRequestId, oneshot::Sender<Result<WireResponse, OutboundFailure>>>,
    pending_gets: HashMap<kad::QueryId, oneshot::Sender<Option<DirectoryEntry>>>,
    shutdown: CancellationToken,
}

impl OverlayNode {
    /// Build the swarm and start listening on the overlay. Any failure here
    /// (transport, behaviour, listen) is fatal to startup.
    pub fn new(
        keypair: &identity::Keypair,
        keydir: Arc<KeyDirectory>,
        router: Router,
        events: mpsc::Sender<NetworkEvent>,
        commands: mpsc::Receiver<OverlayCommand>,
        shutdown: CancellationToken,
    ) -> Result<Self, BoxError> {
        let local_peer_id = PeerId::from(keypair.public());
        let transport = build_transport(keypair)?;
        let (behavior, topic) = build_behavior(keypair, local_peer_id)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor(),
        );
        swarm.listen_on("/ip4/0.0.0.0/tcp/0".parse()?)?;

        Ok(Self {
            swarm,
            topic,
            commands,
            events,
            keydir,
            router,
            pending_requests: HashMap::new(),
            pending_gets: HashMap::new(),
            shutdown,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    pub async fn run(mut self) -> Result<(), BoxError> {
        log::info!("Overlay event loop started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => return Ok(()),
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event).await;
                }
            }
        }
    }

    fn handle_command(&mut self, command: OverlayCommand) {
        match command {
            OverlayCommand::PublishDirectory(update) => {
                let bytes = match serde_json::to_vec(&update) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        log::warn!("Failed to serialize directory update: {err}");
                        return;
                    }
                };
                // With no subscribed peers yet the update simply stays local
                // until gossip convergence catches the peer up.
                if let Err(err) = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(self.topic.clone(), bytes)
                {
                    log::debug!("Directory broadcast not delivered: {err:?}");
                }
            }
            OverlayCommand::PutDirectoryRecord(entry) => {
                let bytes = match serde_json::to_vec(&entry) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        log::warn!("Failed to serialize directory entry: {err}");
                        return;
                    }
                };
                let record = kad::Record::new(kad::RecordKey::new(&entry.room_id), bytes);
                if let Err(err) = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .put_record(record, kad::Quorum::One)
                {
                    log::warn!("Failed to store directory record for {}: {err}", entry.room_id);
                }
            }
            OverlayCommand::GetDirectoryRecord { room_id, reply } => {
                let query_id = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .get_record(kad::RecordKey::new(&room_id));
                self.pending_gets.insert(query_id, reply);
            }
            OverlayCommand::SendRequest {
                peer,
                request,
                reply,
            } => {
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .federation
                    .send_request(&peer, request);
                self.pending_requests.insert(request_id, reply);
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<NodeBehaviorEvent>) {
        match event {
            SwarmEvent::Behaviour(NodeBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                match serde_json::from_slice::<DirectoryUpdate>(&message.data) {
                    Ok(update) => {
                        let _ = self
                            .events
                            .send(NetworkEvent::ReplicatedUpdate(update))
                            .await;
                    }
                    Err(err) => log::debug!("Discarding undecodable directory broadcast: {err}"),
                }
            }
            SwarmEvent::Behaviour(NodeBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, addr) in list {
                    self.swarm
                        .behaviour_mut()
                        .gossipsub
                        .add_explicit_peer(&peer_id);
                    self.swarm
                        .behaviour_mut()
                        .kad
                        .add_address(&peer_id, addr.clone());
                    resolve_discovered_peer(&self.keydir, &peer_id);
                    let _ = self.events.send(NetworkEvent::PeerDiscovered(peer_id)).await;
                }
            }
            SwarmEvent::Behaviour(NodeBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    self.swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                    let _ = self.events.send(NetworkEvent::PeerExpired(peer_id)).await;
                }
            }
            SwarmEvent::Behaviour(NodeBehaviorEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in info.listen_addrs {
                    self.swarm.behaviour_mut().kad.add_address(&peer_id, addr);
                }
                // Best-effort: an unstored key just leaves the peer
                // unauthenticated until it identifies again.
                if let Err(err) = self.keydir.store_key(&peer_id, &info.public_key) {
                    log::debug!("Couldn't store published key for {peer_id}: {err}");
                }
            }
            SwarmEvent::Behaviour(NodeBehaviorEvent::Federation(event)) => {
                self.handle_federation_event(event).await;
            }
            SwarmEvent::Behaviour(NodeBehaviorEvent::Kad(kad::Event::OutboundQueryProgressed {
                id,
                result,
                ..
            })) => {
                self.handle_kad_query(id, result);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                let full_addr = address.with(Protocol::P2p(self.local_peer_id()));
                log::info!("Overlay listening on {full_addr}");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                log::debug!("Connection established with {peer_id}");
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                log::debug!("Connection closed with {peer_id}");
            }
            _ => {}
        }
    }

    async fn handle_federation_event(
        &mut self,
        event: request_response::Event<WireRequest, WireResponse>,
    ) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    // Same handler set as the plain listener, so both
                    // transports answer identically.
                    let response = router::dispatch(&self.router, &request).await;
                    if self
                        .swarm
                        .behaviour_mut()
                        .federation
                        .send_response(channel, response)
                        .is_err()
                    {
                        log::debug!("Peer {peer} went away before the response was sent");
                    }
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending_requests.remove(&request_id) {
                        let _ = reply.send(Ok(response));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                request_id, error, ..
            } => {
                if let Some(reply) = self.pending_requests.remove(&request_id) {
                    let _ = reply.send(Err(error));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                log::debug!("Inbound federation stream from {peer} failed: {error}");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn handle_kad_query(&mut self, id: kad::QueryId, result: kad::QueryResult) {
        match result {
            kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FoundRecord(found))) => {
                if let Some(reply) = self.pending_gets.remove(&id) {
                    let entry = serde_json::from_slice::<DirectoryEntry>(&found.record.value).ok();
                    let _ = reply.send(entry);
                }
            }
            kad::QueryResult::GetRecord(Ok(
                kad::GetRecordOk::FinishedWithNoAdditionalRecord { .. },
            )) => {
                if let Some(reply) = self.pending_gets.remove(&id) {
                    let _ = reply.send(None);
                }
            }
            kad::QueryResult::GetRecord(Err(err)) => {
                log::debug!("Directory record lookup failed: {err}");
                if let Some(reply) = self.pending_gets.remove(&id) {
                    let _ = reply.send(None);
                }
            }
            kad::QueryResult::PutRecord(Ok(kad::PutRecordOk { key })) => {
                log::debug!("Directory record stored under {key:?}");
            }
            kad::QueryResult::PutRecord(Err(err)) => {
                log::warn!("Failed to replicate directory record: {err}");
            }
            _ => {}
        }
    }
}

/// One fire-and-forget key-resolution attempt for a freshly discovered peer.
pub fn resolve_discovered_peer(keydir: &KeyDirectory, peer: &PeerId) {
    match keydir.resolve(peer) {
        Ok(true) => log::debug!("Discovered peer {peer} has a key on file"),
        Ok(false) => log::debug!("Discovered peer {peer} is unauthenticated until it identifies"),
        Err(err) => log::debug!("Key resolution for {peer} failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertisement_triggers_exactly_one_resolution_attempt() {
        let keydir = KeyDirectory::in_memory().unwrap();
        let peer = PeerId::from(identity::Keypair::generate_ed25519().public());

        resolve_discovered_peer(&keydir, &peer);

        assert_eq!(keydir.known_peers().unwrap(), 1);
        assert!(keydir.lookup(&peer).unwrap().is_none());
    }

    #[test]
    fn rediscovery_does_not_duplicate_peer_rows() {
        let keydir = KeyDirectory::in_memory().unwrap();
        let peer = PeerId::from(identity::Keypair::generate_ed25519().public());

        resolve_discovered_peer(&keydir, &peer);
        resolve_discovered_peer(&keydir, &peer);

        assert_eq!(keydir.known_peers().unwrap(), 1);
    }
}
