use std::fs;
use std::path::PathBuf;

use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;

use dendrite_p2p::config::{self, ServerConfig};
use dendrite_p2p::server;

#[derive(Parser)]
#[command(
    name = "dendrite-p2p",
    version,
    about = "Federated chat-room homeserver node on a p2p overlay"
)]
struct Cli {
    /// Name of this instance, used to namespace on-disk state
    #[arg(long, default_value = config::DEFAULT_INSTANCE_NAME)]
    name: String,
    /// Port the client/federation API listens on (0 = OS-assigned)
    #[arg(long, default_value_t = 0)]
    port: u16,
    /// Directory where databases and the identity key are stored
    #[arg(long, default_value = config::DEFAULT_BASE_PATH)]
    path: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    if let Err(err) = fs::create_dir_all(&cli.path) {
        log::error!(
            "Failed to create state directory {}: {err}",
            cli.path.display()
        );
        std::process::exit(1);
    }

    let config = ServerConfig::new(cli.name, cli.port, cli.path);
    let shutdown = CancellationToken::new();
    let notify_port = Box::new(|port: u16| {
        log::info!("Listening on :{port}");
    });

    if let Err(err) = server::init(config, notify_port, shutdown).await {
        log::error!("Fatal: {err}");
        std::process::exit(1);
    }
}
