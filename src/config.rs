use std::path::{Path, PathBuf};

pub const DEFAULT_INSTANCE_NAME: &str = "dendrite-p2p";
pub const DEFAULT_BASE_PATH: &str = "./build";

/// How the public-room directory is replicated across the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationMode {
    /// Broadcast updates to subscribed peers (gossipsub).
    #[default]
    Gossip,
    /// Store entries in the Kademlia DHT.
    Dht,
}

/// Raw launch parameters, before derivation.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub instance_name: String,
    pub port: u16,
    pub base_path: PathBuf,
    pub replication: ReplicationMode,
}

impl ServerConfig {
    pub fn new(instance_name: String, port: u16, base_path: PathBuf) -> Self {
        Self {
            instance_name,
            port,
            base_path,
            replication: ReplicationMode::default(),
        }
    }

    /// Validate the instance name and compute the per-instance file layout.
    pub fn derive(&self) -> Result<DerivedConfig, String> {
        let name = self.instance_name.trim();
        if name.is_empty() {
            return Err("instance name must not be empty".into());
        }
        if name.contains(['/', '\\']) || name.contains(char::is_whitespace) {
            return Err(format!(
                "instance name `{name}` must not contain path separators or whitespace"
            ));
        }

        Ok(DerivedConfig {
            server_name: name.to_string(),
            key_id: format!("ed25519:{name}"),
            port: self.port,
            replication: self.replication,
            private_key_path: self.base_path.join(format!("{name}-private.key")),
            serverkey_path: self.base_path.join(format!("{name}-serverkey.db")),
            databases: DatabaseLayout::derive(&self.base_path, name),
        })
    }
}

/// Validated configuration with every on-disk path resolved.
#[derive(Debug, Clone)]
pub struct DerivedConfig {
    pub server_name: String,
    pub key_id: String,
    pub port: u16,
    pub replication: ReplicationMode,
    pub private_key_path: PathBuf,
    pub serverkey_path: PathBuf,
    pub databases: DatabaseLayout,
}

/// Data-source strings for every subsystem database.
///
/// Only `serverkey` and `publicrooms` are opened by this layer; the rest are
/// handed to the externally-owned homeserver components.
#[derive(Debug, Clone)]
pub struct DatabaseLayout {
    pub account: String,
    pub device: String,
    pub mediaapi: String,
    pub syncapi: String,
    pub roomserver: String,
    pub serverkey: String,
    pub federationsender: String,
    pub appservice: String,
    pub publicrooms: String,
}

impl DatabaseLayout {
    fn derive(base: &Path, name: &str) -> Self {
        let source = |suffix: &str| format!("file:{}/{name}-{suffix}.db", base.display());
        Self {
            account: source("account"),
            device: source("device"),
            mediaapi: source("mediaapi"),
            syncapi: source("syncapi"),
            roomserver: source("roomserver"),
            serverkey: source("serverkey"),
            federationsender: source("federationsender"),
            appservice: source("appservice"),
            publicrooms: source("publicroomsa"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ServerConfig {
        ServerConfig::new(name.to_string(), 0, PathBuf::from("/tmp/state"))
    }

    #[test]
    fn derives_per_instance_layout() {
        let derived = config("node0").derive().unwrap();
        assert_eq!(derived.server_name, "node0");
        assert_eq!(derived.key_id, "ed25519:node0");
        assert_eq!(
            derived.private_key_path,
            PathBuf::from("/tmp/state/node0-private.key")
        );
        assert_eq!(derived.databases.account, "file:/tmp/state/node0-account.db");
        assert_eq!(
            derived.databases.publicrooms,
            "file:/tmp/state/node0-publicroomsa.db"
        );
        assert_eq!(
            derived.serverkey_path,
            PathBuf::from("/tmp/state/node0-serverkey.db")
        );
    }

    #[test]
    fn rejects_empty_instance_name() {
        assert!(config("").derive().is_err());
        assert!(config("   ").derive().is_err());
    }

    #[test]
    fn rejects_names_with_separators() {
        assert!(config("a/b").derive().is_err());
        assert!(config("a b").derive().is_err());
    }
}
