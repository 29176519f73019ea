use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use libp2p::PeerId;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::{BoxError, NetworkEvent};
use crate::config::{ReplicationMode, ServerConfig};
use crate::identity;
use crate::network::{FederationClient, OverlayHandle, OverlayNode};
use crate::router::{self, AppState};
use crate::storage::{self, DirectoryStore, KeyDirectory, OverlayContext};

/// Invoked exactly once with the OS-assigned port of the plain listener.
pub type PortNotifier = Box<dyn FnOnce(u16) + Send>;

/// Bootstrap the node and serve until cancelled.
///
/// Construction failures are fatal and returned as errors; so is either
/// listener terminating while the token is still live. The two documented
/// degrade-in-place cases (identity file I/O, peer key resolution) are
/// absorbed with warnings inside their components.
pub async fn init(
    config: ServerConfig,
    notify_port: PortNotifier,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let cfg = config.derive()?;

    let keypair = identity::load_or_create(&cfg.private_key_path);
    let local_peer_id = PeerId::from(keypair.public());
    log::info!("Server {} has overlay peer id {local_peer_id}", cfg.server_name);

    let keydir = Arc::new(KeyDirectory::open(&cfg.serverkey_path)?);

    // The command channel is created ahead of the node so the directory
    // store and federation client can hold handles into it.
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let overlay = OverlayHandle::new(command_tx);

    let context = match cfg.replication {
        ReplicationMode::Gossip => OverlayContext::Gossip(overlay.clone()),
        ReplicationMode::Dht => OverlayContext::Dht(overlay.clone()),
    };
    let directory = Arc::new(storage::open_directory_store(
        &cfg.databases.publicrooms,
        context,
    )?);

    let state = AppState {
        server_name: cfg.server_name.clone(),
        key_id: cfg.key_id.clone(),
        public_key: keypair.public().encode_protobuf(),
        directory: directory.clone(),
        started_at: Instant::now(),
    };
    let app = router::create_router(state);

    let node = OverlayNode::new(
        &keypair,
        keydir,
        app.clone(),
        event_tx,
        command_rx,
        shutdown.clone(),
    )?;
    let mut overlay_task = tokio::spawn(node.run());

    let federation = FederationClient::new(overlay, cfg.server_name.clone(), cfg.key_id.clone());

    // Replication delivery: remote updates land in the local store, and a
    // fresh peer gets its listing pulled once for anti-entropy.
    let apply_directory = directory.clone();
    let apply_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = apply_shutdown.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(NetworkEvent::ReplicatedUpdate(update)) => {
                        if let Err(err) = apply_directory.apply_remote(&update) {
                            log::warn!("Failed to apply replicated directory update: {err}");
                        }
                    }
                    Some(NetworkEvent::PeerDiscovered(peer)) => {
                        log::info!("Discovered peer {peer} via mDNS");
                        // The embedded store never takes in remote listings.
                        if apply_directory.is_replicated() {
                            sync_directory_from_peer(&federation, &apply_directory, peer);
                        }
                    }
                    Some(NetworkEvent::PeerExpired(peer)) => {
                        log::debug!("Peer {peer} expired from mDNS");
                    }
                    None => break,
                },
            }
        }
    });

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, cfg.port)).await?;
    let port = listener.local_addr()?.port();
    notify_port(port);

    let serve_shutdown = shutdown.clone();
    let mut plain_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await
    });

    // Both listeners run until the process dies; whichever stops first
    // while the token is live takes the whole node down with it.
    let result: Result<(), BoxError> = tokio::select! {
        res = &mut overlay_task => match res {
            Ok(Ok(())) if shutdown.is_cancelled() => Ok(()),
            Ok(Ok(())) => Err("overlay listener terminated unexpectedly".into()),
            Ok(Err(err)) => Err(err),
            Err(err) => Err(err.into()),
        },
        res = &mut plain_task => match res {
            Ok(Ok(())) if shutdown.is_cancelled() => Ok(()),
            Ok(Ok(())) => Err("plain listener terminated unexpectedly".into()),
            Ok(Err(err)) => Err(err.into()),
            Err(err) => Err(err.into()),
        },
    };

    // Make sure no task outlives a fatal error.
    shutdown.cancel();
    overlay_task.abort();
    plain_task.abort();
    result
}

/// Fire-and-forget pull of a discovered peer's public-room listing.
fn sync_directory_from_peer(
    federation: &FederationClient,
    directory: &Arc<DirectoryStore>,
    peer: PeerId,
) {
    let federation = federation.clone();
    let directory = directory.clone();
    tokio::spawn(async move {
        match federation.fetch_public_rooms(&peer).await {
            Ok(entries) => {
                let count = entries.len();
                for entry in entries {
                    if let Err(err) = directory
                        .apply_remote(&crate::common::DirectoryUpdate::Upsert(entry))
                    {
                        log::warn!("Failed to merge directory entry from {peer}: {err}");
                    }
                }
                log::debug!("Merged {count} directory entries from {peer}");
            }
            Err(err) => {
                log::debug!("Directory pull from {peer} failed: {err}");
            }
        }
    });
}
