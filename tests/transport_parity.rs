//! A request answered by the plain TCP listener and the same request
//! answered over the overlay dispatch path must be byte-identical.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;

use dendrite_p2p::common::types::{DirectoryEntry, WireRequest};
use dendrite_p2p::router::{self, AppState, PUBLIC_ROOMS_PATH};
use dendrite_p2p::storage::{DirectoryStore, RoomDirectory};

fn test_state() -> AppState {
    let keypair = libp2p::identity::Keypair::generate_ed25519();
    AppState {
        server_name: "node0".to_string(),
        key_id: "ed25519:node0".to_string(),
        public_key: keypair.public().encode_protobuf(),
        directory: Arc::new(DirectoryStore::Embedded(RoomDirectory::in_memory().unwrap())),
        started_at: Instant::now(),
    }
}

#[tokio::test]
async fn both_transports_answer_identically() {
    let state = test_state();
    state
        .directory
        .upsert(DirectoryEntry {
            room_id: "!parity:p2p".to_string(),
            name: Some("parity room".to_string()),
            topic: Some("transport parity".to_string()),
            joined_members: 12,
            world_readable: true,
        })
        .await
        .unwrap();

    let app = router::create_router(state);

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let serve_app = app.clone();
    let server = tokio::spawn(async move { axum::serve(listener, serve_app).await });

    let paths = [
        "/_matrix/federation/v1/version",
        "/_matrix/key/v2/server",
        PUBLIC_ROOMS_PATH,
        "/unregistered/endpoint",
    ];

    for path in paths {
        let tcp = reqwest::get(format!("http://127.0.0.1:{port}{path}"))
            .await
            .unwrap();
        let tcp_status = tcp.status().as_u16();
        let tcp_body = tcp.bytes().await.unwrap().to_vec();

        let overlay = router::dispatch(
            &app,
            &WireRequest {
                method: "GET".to_string(),
                path: path.to_string(),
                body: Vec::new(),
                origin: None,
                origin_key_id: None,
            },
        )
        .await;

        assert_eq!(tcp_status, overlay.status, "status diverged for {path}");
        assert_eq!(tcp_body, overlay.body, "body diverged for {path}");
    }

    server.abort();
}
