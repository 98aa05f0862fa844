//! # Capsule Replicate
//!
//! A replication daemon keeping DataCapsule replicas in sync.
//!
//! ## Overview
//!
//! Each replica runs a diff engine ([`capsule_sync`]) over its own store
//! ([`capsule_store`]) and is driven two ways:
//!
//! - **Serve**: every message arriving on the transport is fed to the
//!   engine and any reply is sent straight back
//! - **Heartbeat**: on a fixed interval (after a random initial delay) the
//!   replica opens conversations with peers picked in one of three modes:
//!   cycling through peers, one random peer, or a random fanout
//!
//! A replica holding the writer's keypair can also [`Replicator::append`]
//! new records on top of its current head.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capsule_core::Keypair;
//! use capsule_store::MemoryStore;
//! use capsule_sync::{MemoryNetwork, NodeId};
//! use capsule_replicate::{DaemonConfig, Replicator};
//!
//! async fn example() -> capsule_replicate::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let transport = Arc::new(network.create_transport(NodeId::random()).await);
//!     let config = DaemonConfig::from_json(r#"{"heartbeat": "random"}"#)?;
//!
//!     let replica = Arc::new(
//!         Replicator::new(config, Arc::new(MemoryStore::new()), transport, Some(Keypair::generate())).await?,
//!     );
//!     replica.append(b"hello".to_vec()).await?;
//!     replica.run().await
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod heartbeat;

pub use config::{DaemonConfig, HeartbeatMode};
pub use daemon::Replicator;
pub use error::{ReplicateError, Result};
pub use heartbeat::{initial_jitter, PeerSelector};

// Re-export component crates for convenience
pub use capsule_core as core;
pub use capsule_store as store;
pub use capsule_sync as sync;
