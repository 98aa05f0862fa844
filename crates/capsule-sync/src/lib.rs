//! # Capsule Sync
//!
//! Diff-based anti-entropy for DataCapsule replicas.
//!
//! ## Overview
//!
//! Two replicas of a capsule usually hold overlapping, possibly gapped
//! pieces of the same hash-linked chain. Instead of swapping full hash sets
//! they swap *frontiers* (logical begins and ends), walk their own graph
//! from every frontier point the other side does not share, and send only
//! the records lying between points where the two graphs already agree.
//!
//! ## Key Properties
//!
//! - **Convergent**: after one complete exchange both sides hold the union,
//!   as long as the diff fits the configured message and walk budgets
//! - **Incremental**: a diff past those budgets is cut, and every exchange
//!   still ships new records until the replicas agree
//! - **Idempotent**: a second exchange right after transfers nothing
//! - **Isolated**: each conversation runs against its own frozen snapshot
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capsule_store::MemoryStore;
//! use capsule_sync::{AnyPolicy, NodeId, Policy, PolicyKind, Step, SyncConfig};
//!
//! async fn example() -> capsule_sync::Result<()> {
//!     let a = AnyPolicy::new(PolicyKind::Mirror, Arc::new(MemoryStore::new()), SyncConfig::default()).await?;
//!     let b = AnyPolicy::new(PolicyKind::Store, Arc::new(MemoryStore::new()), SyncConfig::default()).await?;
//!     let (id_a, id_b) = (NodeId::random(), NodeId::random());
//!
//!     let mut next = a.generate_message(&id_b).await?;
//!     let mut turn = 0;
//!     while let Some(message) = next.take() {
//!         let (engine, from) = if turn % 2 == 0 { (&b, id_a) } else { (&a, id_b) };
//!         if let Step::Reply(reply) = engine.process_message(&from, message).await? {
//!             next = Some(reply);
//!         }
//!         turn += 1;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Node A                                   Node B
//!   |-- 1: begins, ends ------------------->|
//!   |<- 2: records for A, begins, ends -----|
//!   |-- 3: hashes wanted, records for B --->|
//!   |<- 4: components of wanted hashes -----|
//! ```

pub mod backend;
pub mod convergence;
pub mod engine;
pub mod error;
pub mod messages;
pub mod snapshot;
pub mod transport;
pub mod traversal;
pub mod view;

pub use backend::{GraphBackend, MirrorBackend, StoreBackend};
pub use convergence::{record_set_digest, verify_convergence, ConvergenceResult};
pub use engine::{AnyPolicy, DiffEngine, PeerState, Policy, PolicyKind, Step, SyncConfig};
pub use error::{Result, SyncError};
pub use messages::{limits, NodeId, Phase, SyncMessage};
pub use snapshot::Snapshot;
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
pub use traversal::{connected_component, search_after, search_ahead, Traversal};
pub use view::{GraphView, StoreView};
