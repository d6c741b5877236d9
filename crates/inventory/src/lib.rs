//! Tag-indexed inventory query layer.
//!
//! Inventory resources carry namespaced tags of the form
//! `namespace:predicate=value`. This crate resolves tag expressions into
//! matching tags across any number of independently authenticated
//! inventory accounts, and caches the answers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │        Consumers (autosign policy, lookup, facts)         │
//! ├───────────────────────────────────────────────────────────┤
//! │   TagLookup / FactCollector        TtlCache, SnapshotCache│
//! ├───────────────────────────────────────────────────────────┤
//! │                   InventoryClient                         │
//! │     (fan-out, per-account timeout, sorted merge, dedup)   │
//! ├───────────────────────────────────────────────────────────┤
//! │                 TagSearchBackend trait                    │
//! ├──────────────────┬────────────────────────────────────────┤
//! │ MemoryInventory  │  RightScaleBackend                     │
//! │   (testing)      │  (autosign-inventory-rightscale)       │
//! └──────────────────┴────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use autosign_inventory::{InventoryClient, MemoryInventory, TaggedResource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let prod = MemoryInventory::with_resources("1111", [TaggedResource::new(["nd:auth=k1"])]);
//!     let staging =
//!         MemoryInventory::with_resources("2222", [TaggedResource::new(["nd:auth=k1"])]);
//!     let client = InventoryClient::new(vec![Arc::new(prod), Arc::new(staging)]);
//!
//!     // Keep duplicates: two resources carrying the same tag is a signal.
//!     let tags = client.search_by_tag_prefix("nd", Some("auth"), "nd:auth=k1", false).await?;
//!     assert_eq!(tags, vec!["nd:auth=k1", "nd:auth=k1"]);
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with canned and failing backends. Enable this in
//!   `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod error;
pub mod facts;
pub mod lookup;
pub mod memory;
pub mod query;
pub mod snapshot;
pub mod tag;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backend::{INSTANCES, TagQuery, TagSearchBackend, TaggedResource};
pub use cache::{CacheEntry, TtlCache};
pub use error::{BoxError, InventoryError, InventoryResult};
pub use facts::{FactCollector, InstanceInput, InstanceRecord, InstanceSource, ResourceLink};
pub use lookup::{LookupConfig, LookupScope, ResolutionType, TagLookup};
pub use memory::MemoryInventory;
pub use query::{DEFAULT_ACCOUNT_TIMEOUT, DEFAULT_MAX_CONCURRENCY, InventoryClient, QueryConfig};
pub use snapshot::{
    DEFAULT_SNAPSHOT_PATH, DEFAULT_SNAPSHOT_TTL, DEFAULT_TAGS_TTL, Facts, SnapshotCache,
    SnapshotPolicy,
};
pub use tag::{TagExpression, search_prefix, split_tag};
