//! # Capsule Testkit
//!
//! Testing utilities for DataCapsule replication.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: signed chains, forks, partial replicas and a direct
//!   (transport-free) conversation driver
//! - **Generators**: proptest strategies for records and replica splits
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use capsule_testkit::generators::{record_from_params, RecordParams};
//!
//! proptest! {
//!     #[test]
//!     fn record_hash_is_deterministic(params: RecordParams) {
//!         let r1 = record_from_params(&params);
//!         let r2 = record_from_params(&params);
//!         prop_assert_eq!(r1.hash, r2.hash);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use capsule_sync::PolicyKind;
//! use capsule_testkit::fixtures::{exchange, ChainFixture, Replica};
//!
//! async fn example() -> capsule_sync::Result<()> {
//!     let chain = ChainFixture::new(10);
//!     let a = Replica::memory(1, PolicyKind::Mirror, &chain.records[..5], chain.sync_config()).await?;
//!     let b = Replica::memory(2, PolicyKind::Store, &chain.records[5..], chain.sync_config()).await?;
//!     let report = exchange(&a, &b).await?;
//!     assert_eq!(report.records_shipped(), 10);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{exchange, ChainFixture, ExchangeReport, Replica};
pub use generators::{record_from_params, RecordParams, ReplicaSplit};
