//! Peer-to-peer bootstrap layer for a federated chat-room homeserver.
//!
//! Instead of addressing peers through DNS, each instance joins a libp2p
//! overlay: identity is a persisted ed25519 keypair, peers on the local
//! segment are found via mDNS, federation requests travel over multiplexed
//! overlay streams, and the public-room directory is replicated either by
//! gossip broadcast or through the Kademlia DHT.
//!
//! Module map:
//! - [`identity`] — durable node keypair (load-or-create)
//! - [`network`] — overlay node, transport, behaviour, federation client
//! - [`storage`] — directory store selector and backends, key directory
//! - [`router`] — the HTTP surface served identically on both transports
//! - [`server`] — the bootstrap orchestrator

pub mod common;
pub mod config;
pub mod identity;
pub mod network;
pub mod router;
pub mod server;
pub mod storage;
