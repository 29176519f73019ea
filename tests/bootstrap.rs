//! End-to-end bootstrap: `server::init` with an ephemeral port must report
//! the OS-assigned port exactly once, serve on it, and stop on cancellation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dendrite_p2p::config::ServerConfig;
use dendrite_p2p::server::{self, PortNotifier};

#[tokio::test]
async fn init_reports_the_bound_port_and_serves_on_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new("node0".to_string(), 0, dir.path().to_path_buf());
    let shutdown = CancellationToken::new();

    let (port_tx, mut port_rx) = mpsc::channel(2);
    let notify: PortNotifier = Box::new(move |port| {
        port_tx.try_send(port).unwrap();
    });

    let node = tokio::spawn(server::init(config, notify, shutdown.clone()));

    let port = tokio::time::timeout(Duration::from_secs(10), port_rx.recv())
        .await
        .expect("no port was reported")
        .expect("the node stopped before reporting its port");
    assert_ne!(port, 0);
    // The notifier fired once and is consumed.
    assert!(port_rx.try_recv().is_err());

    let response = reqwest::get(format!(
        "http://127.0.0.1:{port}/_matrix/federation/v1/version"
    ))
    .await
    .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["server"]["name"], "dendrite-p2p");

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), node)
        .await
        .expect("the node did not stop after cancellation")
        .unwrap();
    assert!(result.is_ok(), "init returned an error: {result:?}");
}
